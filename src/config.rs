//! Runtime configuration for the mirror engine.
//!
//! Defaults mirror the published per-identity quota envelope of the remote
//! API: twenty parallel requests spread over a pool of twenty credentials,
//! one hundred requests per second overall.

use std::path::PathBuf;

/// Number of parallel remote calls and, equally, the credential pool size.
pub const DEFAULT_PARALLEL_LIMIT: usize = 20;

/// Files requested per listing page. Values above 1000 are capped before use;
/// the larger the value, the more likely a single page read times out.
pub const DEFAULT_PAGE_SIZE: i64 = 1004;

/// Retries allowed per remote call before the envelope reports exhaustion.
pub const DEFAULT_RETRY_LIMIT: u32 = 7;

/// Aggregate request rate across all workers, events per second.
pub const DEFAULT_RATE_PER_SEC: u32 = 100;

/// Directory scanned for `*.json` service-account files.
pub const DEFAULT_SA_LOCATION: &str = "sa";

/// Local database holding tasks, copied marks, and the listing cache.
pub const DEFAULT_DB_PATH: &str = "drivemirror.sqlite";

/// Resolved engine configuration.
///
/// Built from CLI flags layered over the defaults above; every field is
/// plain data so the struct can be cloned into worker setup freely.
#[derive(Debug, Clone)]
pub struct Config {
    /// Credential pool size and worker semaphore size.
    pub parallel_limit: usize,
    /// Per-list-call page size (capped at 1000 before use).
    pub page_size: i64,
    /// Retries per envelope invocation.
    pub retry_limit: u32,
    /// Aggregate request rate, events per second.
    pub rate_per_sec: u32,
    /// Destination used when a copy request omits the target.
    pub default_target: Option<String>,
    /// Directory containing service-account credential files.
    pub sa_location: PathBuf,
    /// Path to the local SQLite database.
    pub db_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parallel_limit: DEFAULT_PARALLEL_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
            retry_limit: DEFAULT_RETRY_LIMIT,
            rate_per_sec: DEFAULT_RATE_PER_SEC,
            default_target: None,
            sa_location: PathBuf::from(DEFAULT_SA_LOCATION),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
        }
    }
}

impl Config {
    /// Page size actually sent to the remote, never above the API ceiling.
    #[must_use]
    pub fn effective_page_size(&self) -> i64 {
        self.page_size.min(1000)
    }
}
