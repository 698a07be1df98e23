//! HTTP adapter implementing [`RemoteStore`] against a Drive-v3-shaped
//! REST surface.
//!
//! The base URL is injectable so tests can point the adapter at a mock
//! server; production uses the public endpoint. Listing follows
//! `nextPageToken` pagination until the final page.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::{ApiError, Drive, FieldSelection, ListQuery, ObjectKind, RemoteObject, RemoteStore};
use crate::auth::Credential;

/// Production API root.
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/drive/v3/";

/// MIME type marking an object as a folder.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const FIELDS_CORE: &str = "id,name,teamDriveId,md5Checksum,mimeType,size,parents";
const FIELDS_CORE_MODIFIED: &str = "id,name,teamDriveId,md5Checksum,mimeType,size,modifiedTime,parents";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,md5Checksum,mimeType,size,parents)";
const LIST_FIELDS_MODIFIED: &str =
    "nextPageToken,files(id,name,md5Checksum,mimeType,size,modifiedTime,parents)";

/// Wire representation of a file resource.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: String,
    /// The API serializes sizes as decimal strings.
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    md5_checksum: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    modified_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    team_drive_id: Option<String>,
}

impl From<FileResource> for RemoteObject {
    fn from(res: FileResource) -> Self {
        let kind = if res.mime_type == FOLDER_MIME_TYPE {
            ObjectKind::Folder
        } else {
            ObjectKind::File
        };
        Self {
            id: res.id,
            name: res.name,
            kind,
            size: res.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            checksum: res.md5_checksum,
            parent: res.parents.into_iter().next(),
            modified: res.modified_time,
            team_drive_id: res.team_drive_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListPage {
    #[serde(default)]
    files: Vec<FileResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveResource {
    id: String,
    name: String,
}

/// Error payload shape: `{"error": {"message": "..."}}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// [`RemoteStore`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    http: reqwest::Client,
    base: Url,
}

impl HttpRemoteStore {
    /// Adapter against the production endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, ApiError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Adapter against an explicit base URL (tests point this at a mock).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] on an unparsable URL or client build
    /// failure.
    pub fn with_base_url(base: &str) -> Result<Self, ApiError> {
        // A trailing slash keeps Url::join from eating the last path segment.
        let normalized = if base.ends_with('/') {
            base.to_owned()
        } else {
            format!("{base}/")
        };
        let base = Url::parse(&normalized).map_err(|e| ApiError::Transport(e.to_string()))?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|e| ApiError::Transport(e.to_string()))
    }

    /// Turns a non-success response into an [`ApiError::Status`], pulling the
    /// message out of the JSON error envelope when present.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let code = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error)
            .and_then(|e| e.message)
            .unwrap_or(body);
        Err(ApiError::Status { code, message })
    }

    fn transport(err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    #[instrument(skip(self, cred), fields(principal = %cred.principal))]
    async fn get_drive(&self, cred: &Credential, id: &str) -> Result<Drive, ApiError> {
        let url = self.endpoint(&format!("drives/{id}"))?;
        let response = self
            .http
            .get(url)
            .bearer_auth(&cred.access_token)
            .send()
            .await
            .map_err(Self::transport)?;
        let drive: DriveResource = Self::check(response)
            .await?
            .json()
            .await
            .map_err(Self::transport)?;
        Ok(Drive {
            id: drive.id,
            name: drive.name,
        })
    }

    #[instrument(skip(self, cred), fields(principal = %cred.principal))]
    async fn get_file(
        &self,
        cred: &Credential,
        id: &str,
        fields: FieldSelection,
    ) -> Result<RemoteObject, ApiError> {
        let field_list = match fields {
            FieldSelection::Core => FIELDS_CORE,
            FieldSelection::WithModified => FIELDS_CORE_MODIFIED,
        };
        let url = self.endpoint(&format!("files/{id}"))?;
        let response = self
            .http
            .get(url)
            .query(&[("supportsAllDrives", "true"), ("fields", field_list)])
            .bearer_auth(&cred.access_token)
            .send()
            .await
            .map_err(Self::transport)?;
        let file: FileResource = Self::check(response)
            .await?
            .json()
            .await
            .map_err(Self::transport)?;
        Ok(file.into())
    }

    #[instrument(skip(self, cred, query), fields(parent = %query.parent))]
    async fn list_children(
        &self,
        cred: &Credential,
        query: &ListQuery,
    ) -> Result<Vec<RemoteObject>, ApiError> {
        let q = format!("'{}' in parents and trashed = false", query.parent);
        let fields = if query.with_modified {
            LIST_FIELDS_MODIFIED
        } else {
            LIST_FIELDS
        };
        let page_size = query.page_size.to_string();
        let include_all = query.include_all_drives.to_string();
        let supports_all = query.supports_all_drives.to_string();

        let mut children = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = self.endpoint("files")?;
            let mut request = self
                .http
                .get(url)
                .query(&[
                    ("q", q.as_str()),
                    ("fields", fields),
                    ("orderBy", "folder,name desc"),
                    ("pageSize", page_size.as_str()),
                    ("includeItemsFromAllDrives", include_all.as_str()),
                    ("supportsAllDrives", supports_all.as_str()),
                ])
                .bearer_auth(&cred.access_token);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request.send().await.map_err(Self::transport)?;
            let page: FileListPage = Self::check(response)
                .await?
                .json()
                .await
                .map_err(Self::transport)?;

            children.extend(page.files.into_iter().map(RemoteObject::from));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(count = children.len(), "listing complete");
        Ok(children)
    }

    #[instrument(skip(self, cred), fields(principal = %cred.principal))]
    async fn create_folder(
        &self,
        cred: &Credential,
        parent: &str,
        name: &str,
    ) -> Result<RemoteObject, ApiError> {
        let url = self.endpoint("files")?;
        let body = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent],
        });
        let response = self
            .http
            .post(url)
            .query(&[("supportsAllDrives", "true")])
            .bearer_auth(&cred.access_token)
            .json(&body)
            .send()
            .await
            .map_err(Self::transport)?;
        let file: FileResource = Self::check(response)
            .await?
            .json()
            .await
            .map_err(Self::transport)?;
        Ok(file.into())
    }

    #[instrument(skip(self, cred), fields(principal = %cred.principal))]
    async fn copy_file(
        &self,
        cred: &Credential,
        src_id: &str,
        dest_parent: &str,
    ) -> Result<RemoteObject, ApiError> {
        let url = self.endpoint(&format!("files/{src_id}/copy"))?;
        let body = serde_json::json!({ "parents": [dest_parent] });
        let response = self
            .http
            .post(url)
            .query(&[("supportsAllDrives", "true")])
            .bearer_auth(&cred.access_token)
            .json(&body)
            .send()
            .await
            .map_err(Self::transport)?;
        let file: FileResource = Self::check(response)
            .await?
            .json()
            .await
            .map_err(Self::transport)?;
        Ok(file.into())
    }
}
