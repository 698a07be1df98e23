//! Remote object store seam.
//!
//! The mirror engine talks to the remote provider only through the
//! [`RemoteStore`] trait, so the transfer machinery can be exercised against
//! an in-memory double while production runs go through the HTTP adapter in
//! [`http`]. The trait surface is the five calls the engine actually needs:
//! drive lookup, file lookup, child listing, folder creation, and server-side
//! file copy.

mod error;
pub mod http;

pub use error::{ApiError, ErrorClass, classify};

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::auth::Credential;

/// Identifiers accepted verbatim even though they fail the length rule.
const RESERVED_IDS: [&str; 3] = ["root", "appDataFolder", "photos"];

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // The pattern is a compile-time constant.
    #[allow(clippy::unwrap_used)]
    let pattern = Regex::new("^[A-Za-z0-9_-]+$").unwrap();
    pattern
});

/// Whether an object is a folder or a regular file.
///
/// Folders and files share one identifier namespace; the kind travels with
/// the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Folder,
    File,
}

/// A single remote object as returned by lookups and listings.
///
/// `size` is zero for folders. `parent` is the containing folder identifier;
/// only the root of a drive has none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
    pub kind: ObjectKind,
    #[serde(default)]
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_drive_id: Option<String>,
}

impl RemoteObject {
    /// True when the object is a folder.
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.kind == ObjectKind::Folder
    }

    /// A bare folder reference carrying only an identifier.
    ///
    /// Used where the engine needs a destination anchor it never fetched,
    /// e.g. when copying directly into an existing target folder.
    #[must_use]
    pub fn folder_ref(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            kind: ObjectKind::Folder,
            size: 0,
            checksum: None,
            parent: None,
            modified: None,
            team_drive_id: None,
        }
    }
}

/// A shared drive (team drive) container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drive {
    pub id: String,
    pub name: String,
}

/// Which optional fields a file lookup should request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSelection {
    /// id, name, kind, size, checksum, parents, team drive id.
    Core,
    /// Core plus the last-modified timestamp.
    WithModified,
}

/// Parameters of one child-listing call.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    /// Folder whose direct children are listed.
    pub parent: String,
    /// Include items living on shared drives.
    pub include_all_drives: bool,
    /// The caller understands shared-drive responses.
    pub supports_all_drives: bool,
    /// Request the modified timestamp for every child.
    pub with_modified: bool,
    /// Page size, already capped to the API ceiling.
    pub page_size: i64,
}

impl ListQuery {
    /// Builds the listing query for `parent`'s direct children.
    ///
    /// Shared-drive flags are set unless the parent is the personal root or
    /// the caller asserted the link is not a shared drive, which lets the
    /// remote skip the more expensive cross-drive query path.
    #[must_use]
    pub fn children_of(parent: &str, not_team_drive: bool, with_modified: bool, page_size: i64) -> Self {
        let all_drives = !(parent == "root" || not_team_drive);
        Self {
            parent: parent.to_owned(),
            include_all_drives: all_drives,
            supports_all_drives: all_drives,
            with_modified,
            page_size,
        }
    }
}

/// The remote provider surface consumed by the transfer engine.
///
/// Every call authenticates with the supplied [`Credential`]; errors come
/// back HTTP-shaped so [`classify`] can sort them into retry classes.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Fetches a shared drive by identifier.
    async fn get_drive(&self, cred: &Credential, id: &str) -> Result<Drive, ApiError>;

    /// Fetches a single object by identifier.
    async fn get_file(
        &self,
        cred: &Credential,
        id: &str,
        fields: FieldSelection,
    ) -> Result<RemoteObject, ApiError>;

    /// Lists all direct children of a folder, following pagination to the end.
    async fn list_children(
        &self,
        cred: &Credential,
        query: &ListQuery,
    ) -> Result<Vec<RemoteObject>, ApiError>;

    /// Creates a folder named `name` under `parent`.
    async fn create_folder(
        &self,
        cred: &Credential,
        parent: &str,
        name: &str,
    ) -> Result<RemoteObject, ApiError>;

    /// Server-side copy of `src_id` into `dest_parent`.
    async fn copy_file(
        &self,
        cred: &Credential,
        src_id: &str,
        dest_parent: &str,
    ) -> Result<RemoteObject, ApiError>;
}

/// Validates a user-supplied object identifier.
///
/// Accepts the reserved aliases (`root`, `appDataFolder`, `photos`) and
/// otherwise requires 10-100 characters drawn from `[A-Za-z0-9_-]`.
#[must_use]
pub fn validate_object_id(id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    if RESERVED_IDS.contains(&id) {
        return true;
    }
    if id.len() < 10 || id.len() > 100 {
        return false;
    }
    ID_PATTERN.is_match(id)
}
