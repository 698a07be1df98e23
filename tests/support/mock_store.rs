//! In-memory [`RemoteStore`] double with scripted failures and a call
//! recorder, plus a canned credential source and a ready-wired test rig.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use drivemirror::auth::AuthError;
use drivemirror::{
    ApiError, Credential, CredentialPool, CredentialSource, Database, Drive, FieldSelection,
    ListQuery, ObjectKind, RateGate, RemoteCaller, RemoteObject, RemoteStore, TaskStore,
};

/// One remote call as the mock saw it.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub op: &'static str,
    pub principal: String,
    pub detail: String,
}

#[derive(Default)]
struct MockState {
    objects: HashMap<String, RemoteObject>,
    drives: HashMap<String, Drive>,
    /// Status codes returned (in order) before calls start succeeding.
    scripted: VecDeque<u16>,
    calls: Vec<CallRecord>,
    /// (source id, destination parent, new id) per successful copy.
    copies: Vec<(String, String, String)>,
    /// Source ids whose copy always fails with 404.
    failing: std::collections::HashSet<String>,
    next_id: u64,
}

/// Scriptable in-memory remote.
#[derive(Default)]
pub struct MockRemoteStore {
    state: Mutex<MockState>,
}

impl MockRemoteStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn add_folder(&self, id: &str, name: &str, parent: Option<&str>) {
        let mut object = RemoteObject::folder_ref(id);
        object.name = name.to_owned();
        object.parent = parent.map(str::to_owned);
        self.lock().objects.insert(id.to_owned(), object);
    }

    pub fn add_file(&self, id: &str, name: &str, parent: &str, size: i64) {
        let object = RemoteObject {
            id: id.to_owned(),
            name: name.to_owned(),
            kind: ObjectKind::File,
            size,
            checksum: None,
            parent: Some(parent.to_owned()),
            modified: None,
            team_drive_id: None,
        };
        self.lock().objects.insert(id.to_owned(), object);
    }

    pub fn add_drive(&self, id: &str, name: &str) {
        self.lock().drives.insert(
            id.to_owned(),
            Drive {
                id: id.to_owned(),
                name: name.to_owned(),
            },
        );
    }

    /// The next `codes.len()` calls fail with these statuses, in order,
    /// regardless of operation or credential.
    pub fn fail_next(&self, codes: &[u16]) {
        self.lock().scripted.extend(codes.iter().copied());
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, op: &str) -> Vec<CallRecord> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    /// Direct children currently present under `parent`.
    pub fn children_of(&self, parent: &str) -> Vec<RemoteObject> {
        self.lock()
            .objects
            .values()
            .filter(|o| o.parent.as_deref() == Some(parent))
            .cloned()
            .collect()
    }

    /// How many times `src` has been copied.
    pub fn copies_of(&self, src: &str) -> usize {
        self.lock().copies.iter().filter(|(s, _, _)| s == src).count()
    }

    /// Makes every copy of `src` fail terminally with 404.
    pub fn fail_object(&self, src: &str) {
        self.lock().failing.insert(src.to_owned());
    }

    /// Lets `src` copy normally again.
    pub fn unfail_object(&self, src: &str) {
        self.lock().failing.remove(src);
    }

    /// Records the call and pops a scripted failure if one is queued.
    fn enter(
        &self,
        op: &'static str,
        cred: &Credential,
        detail: impl Into<String>,
    ) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.calls.push(CallRecord {
            op,
            principal: cred.principal.clone(),
            detail: detail.into(),
        });
        match state.scripted.pop_front() {
            Some(code) => Err(ApiError::status(code)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn get_drive(&self, cred: &Credential, id: &str) -> Result<Drive, ApiError> {
        self.enter("drives.get", cred, id)?;
        self.lock()
            .drives
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::status(404))
    }

    async fn get_file(
        &self,
        cred: &Credential,
        id: &str,
        _fields: FieldSelection,
    ) -> Result<RemoteObject, ApiError> {
        self.enter("files.get", cred, id)?;
        self.lock()
            .objects
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::status(404))
    }

    async fn list_children(
        &self,
        cred: &Credential,
        query: &ListQuery,
    ) -> Result<Vec<RemoteObject>, ApiError> {
        self.enter("files.list", cred, query.parent.clone())?;
        Ok(self.children_of(&query.parent))
    }

    async fn create_folder(
        &self,
        cred: &Credential,
        parent: &str,
        name: &str,
    ) -> Result<RemoteObject, ApiError> {
        self.enter("files.create", cred, name)?;
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("dst-{}", state.next_id);
        let mut object = RemoteObject::folder_ref(&id);
        object.name = name.to_owned();
        object.parent = Some(parent.to_owned());
        state.objects.insert(id.clone(), object.clone());
        Ok(object)
    }

    async fn copy_file(
        &self,
        cred: &Credential,
        src_id: &str,
        dest_parent: &str,
    ) -> Result<RemoteObject, ApiError> {
        self.enter("files.copy", cred, src_id)?;
        let mut state = self.lock();
        if state.failing.contains(src_id) {
            return Err(ApiError::status(404));
        }
        let source = state
            .objects
            .get(src_id)
            .cloned()
            .ok_or_else(|| ApiError::status(404))?;
        state.next_id += 1;
        let id = format!("copy-{}", state.next_id);
        let object = RemoteObject {
            id: id.clone(),
            parent: Some(dest_parent.to_owned()),
            ..source
        };
        state.objects.insert(id.clone(), object.clone());
        state
            .copies
            .push((src_id.to_owned(), dest_parent.to_owned(), id));
        Ok(object)
    }
}

/// Credential source yielding one live credential per listed name.
pub struct StaticCredentials(pub Vec<&'static str>);

#[async_trait]
impl CredentialSource for StaticCredentials {
    fn enumerate(&self) -> Result<Vec<Vec<u8>>, AuthError> {
        Ok(self.0.iter().map(|name| name.as_bytes().to_vec()).collect())
    }

    async fn parse(&self, blob: &[u8]) -> Result<Credential, AuthError> {
        let name = String::from_utf8_lossy(blob).to_string();
        Ok(Credential {
            access_token: format!("tok-{name}"),
            principal: name,
            expires_at: Utc::now() + Duration::hours(1),
        })
    }
}

/// Fully wired engine over the mock remote and an in-memory task store.
pub struct TestRig {
    pub mock: Arc<MockRemoteStore>,
    pub pool: Arc<CredentialPool>,
    pub caller: Arc<RemoteCaller>,
    pub task_store: TaskStore,
    pub semaphore: Arc<Semaphore>,
    pub cancel: CancellationToken,
}

/// Builds a rig with the given credential names, pool capacity, and retry
/// budget. The rate gate is disabled so tests run at full speed.
pub async fn rig(
    mock: Arc<MockRemoteStore>,
    credentials: Vec<&'static str>,
    capacity: usize,
    retry_limit: u32,
) -> TestRig {
    let cancel = CancellationToken::new();
    let pool = Arc::new(
        CredentialPool::init(Arc::new(StaticCredentials(credentials)), capacity)
            .await
            .expect("pool init"),
    );
    let caller = Arc::new(RemoteCaller::new(
        Arc::clone(&mock) as Arc<dyn RemoteStore>,
        Arc::clone(&pool),
        Arc::new(RateGate::new(0)),
        retry_limit,
        cancel.clone(),
    ));
    let task_store = TaskStore::new(Database::new_in_memory().await.expect("in-memory db"));
    TestRig {
        mock,
        pool,
        caller,
        task_store,
        semaphore: Arc::new(Semaphore::new(20)),
        cancel,
    }
}
