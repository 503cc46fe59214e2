//! Locally cached identity descriptor.
//!
//! The authenticated session itself is an opaque, cookie-backed
//! `ServerSession` owned by the HTTP client; this module holds the separate,
//! advisory `CachedIdentity` persisted in a local JSON file. It exists only
//! to answer "is someone logged in" at startup without a round trip, and it
//! can be stale: any authorized operation must still be prepared for
//! `Unauthorized` regardless of a cached identity being present.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

#[cfg(feature = "remote")]
use crate::client::Client;

/// Minimal user descriptor cached after login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedIdentity {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl CachedIdentity {
    /// Role membership check. Roles are rarely populated client-side;
    /// authorization is enforced by the backend, never by this flag.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// File-backed store for the cached identity.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        IdentityStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached identity. A missing or corrupt cache degrades to
    /// logged-out rather than erroring.
    pub fn load(&self) -> Option<CachedIdentity> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(identity) => Some(identity),
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "corrupt identity cache");
                None
            }
        }
    }

    /// Persist an identity after a successful login.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError` when the cache cannot be encoded or written.
    pub fn store(&self, identity: &CachedIdentity) -> Result<(), IdentityError> {
        let content =
            serde_json::to_string_pretty(identity).map_err(|source| IdentityError::Encode { source })?;
        std::fs::write(&self.path, content).map_err(|source| IdentityError::Write { source })
    }

    /// Remove the cached identity. Always succeeds from the caller's
    /// perspective; a failing filesystem is logged and the user is treated
    /// as logged out.
    pub fn clear(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "cannot remove identity cache");
            }
        }
    }
}

/// Terminate the session and forget the cached identity.
///
/// The logout network call is best-effort; local identity state is cleared
/// regardless of whether the server acknowledged, so the client can always
/// forcibly de-authenticate.
#[cfg(feature = "remote")]
pub fn sign_out(client: &Client, store: &IdentityStore) {
    client.logout();
    store.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> IdentityStore {
        IdentityStore::new(dir.path().join("identity.json"))
    }

    fn identity() -> CachedIdentity {
        CachedIdentity {
            name: "Jane Admin".into(),
            email: "jane@example.com".into(),
            roles: vec!["System Manager".into()],
        }
    }

    #[test]
    fn store_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.store(&identity()).unwrap();
        assert_eq!(store.load(), Some(identity()));
    }

    #[test]
    fn missing_cache_reads_logged_out() {
        let dir = TempDir::new().unwrap();
        assert_eq!(store_in(&dir).load(), None);
    }

    #[test]
    fn corrupt_cache_reads_logged_out() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn clear_removes_cache_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.store(&identity()).unwrap();
        store.clear();
        assert_eq!(store.load(), None);

        // Clearing an already-empty store is fine.
        store.clear();
    }

    #[test]
    fn has_role() {
        let id = identity();
        assert!(id.has_role("System Manager"));
        assert!(!id.has_role("Administrator"));
    }

    #[test]
    fn roles_default_empty_on_old_caches() {
        let id: CachedIdentity =
            serde_json::from_str(r#"{"name": "x", "email": "x@y.z"}"#).unwrap();
        assert!(id.roles.is_empty());
    }
}
