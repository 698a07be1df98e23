//! Credentials and the rotating credential pool.
//!
//! Each service-account identity carries its own request quota, so the
//! engine rotates through a pool of them: a bounded hot set of activated
//! credentials that workers check out per call, backed by a cold stack of
//! raw credential files activated lazily as hot identities get throttled
//! out.

mod file_source;
mod pool;
pub mod service_account;

pub use file_source::FileCredentialSource;
pub use pool::{CredentialPool, PoolError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Credential loading and activation errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Filesystem failure while enumerating or reading credential files.
    #[error("failed to read credential files: {0}")]
    Io(#[from] std::io::Error),

    /// A credential blob did not parse as a service-account key.
    #[error("malformed credential: {0}")]
    Malformed(String),

    /// The token endpoint rejected or failed the assertion exchange.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
}

/// An activated identity: a bearer token tied to one principal.
///
/// While checked out of the pool a credential is held by exactly one caller;
/// cloning the token into a request does not change ownership.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Bearer token presented on remote calls.
    pub access_token: String,
    /// The identity this token belongs to (service-account email).
    pub principal: String,
    /// When the token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// True once the token's lifetime has elapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Source of raw credential material and its activation into [`Credential`]s.
///
/// `parse` performs the full activation (deserialize the blob, then obtain a
/// token for it); `validate` is the cheap liveness check the pool applies
/// before admitting a credential to the hot set.
#[async_trait]
pub trait CredentialSource: Send + Sync + 'static {
    /// Enumerates all candidate credential blobs at the configured location.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if the location cannot be read.
    fn enumerate(&self) -> Result<Vec<Vec<u8>>, AuthError>;

    /// Activates one raw blob into a usable credential.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Malformed`] on undecodable blobs and
    /// [`AuthError::TokenExchange`] when no token could be obtained.
    async fn parse(&self, blob: &[u8]) -> Result<Credential, AuthError>;

    /// Whether an activated credential is still usable.
    fn validate(&self, cred: &Credential) -> bool {
        !cred.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_credential_expiry() {
        let live = Credential {
            access_token: "t".into(),
            principal: "sa@example.iam".into(),
            expires_at: Utc::now() + Duration::hours(1),
        };
        assert!(!live.is_expired());

        let stale = Credential {
            expires_at: Utc::now() - Duration::seconds(1),
            ..live
        };
        assert!(stale.is_expired());
    }
}
