//! File-based credential source: `*.json` service-account keys in one
//! directory.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::service_account::{ServiceAccountKey, exchange_token};
use super::{AuthError, Credential, CredentialSource};

/// Enumerates service-account key files under a directory and activates them
/// through the OAuth token exchange.
#[derive(Debug, Clone)]
pub struct FileCredentialSource {
    dir: PathBuf,
    http: reqwest::Client,
}

impl FileCredentialSource {
    /// Source over the given directory. The directory is read lazily on
    /// [`CredentialSource::enumerate`], so a missing directory surfaces
    /// there rather than here.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CredentialSource for FileCredentialSource {
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    fn enumerate(&self) -> Result<Vec<Vec<u8>>, AuthError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        // Deterministic order so the warm set is stable across runs.
        paths.sort();

        debug!(count = paths.len(), "credential files found");

        let mut blobs = Vec::with_capacity(paths.len());
        for path in paths {
            blobs.push(std::fs::read(path)?);
        }
        Ok(blobs)
    }

    async fn parse(&self, blob: &[u8]) -> Result<Credential, AuthError> {
        let key = ServiceAccountKey::from_json(blob)?;
        exchange_token(&self.http, &key).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_enumerate_filters_and_orders_json_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), b"{\"b\":1}").unwrap();
        std::fs::write(dir.path().join("a.json"), b"{\"a\":1}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let source = FileCredentialSource::new(dir.path());
        let blobs = source.enumerate().unwrap();
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0], b"{\"a\":1}");
        assert_eq!(blobs[1], b"{\"b\":1}");
    }

    #[test]
    fn test_enumerate_missing_directory_is_io_error() {
        let source = FileCredentialSource::new("/nonexistent/sa-dir");
        assert!(matches!(source.enumerate(), Err(AuthError::Io(_))));
    }
}
