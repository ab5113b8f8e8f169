//! Credential persistence
//!
//! `CredentialStore` is the seam between a session and whatever holds its
//! persisted token: a JSON file here, a keychain or preferences store in an
//! embedding front-end. The session drives the store sequentially (load at
//! construction, save on each new token, clear on logout), so implementations
//! only need to tolerate non-overlapping calls.
//!
//! `FileCredentialStore` writes atomically (temp file + rename) to prevent
//! corruption on crash, with 0600 permissions since the file contains the
//! access token.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::token::TokenRecord;

/// Load/save/clear of a single persisted token record.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn CredentialStore>`).
pub trait CredentialStore: Send + Sync {
    /// Load the persisted record, or `None` if nothing is stored.
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<TokenRecord>>> + Send + '_>>;

    /// Replace the persisted record.
    fn save(&self, record: TokenRecord) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Remove the persisted record. Clearing an empty store is not an error.
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// File-backed credential store holding one JSON-encoded `TokenRecord`.
pub struct FileCredentialStore {
    path: PathBuf,
    // Serializes save/clear so a rename never races a concurrent temp write
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    /// Create a store backed by the given file path. The file is created on
    /// first save; a missing file loads as `None`.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    async fn load_inner(&self) -> Result<Option<TokenRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(format!("reading credential file: {e}"))),
        };
        let record: TokenRecord = serde_json::from_str(&contents)
            .map_err(|e| Error::Parse(format!("parsing credential file: {e}")))?;
        debug!(path = %self.path.display(), "loaded credential record");
        Ok(Some(record))
    }

    async fn save_inner(&self, record: TokenRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.path, &record).await
    }

    async fn clear_inner(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "cleared credential record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(format!("removing credential file: {e}"))),
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<TokenRecord>>> + Send + '_>> {
        Box::pin(self.load_inner())
    }

    fn save(&self, record: TokenRecord) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.save_inner(record))
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.clear_inner())
    }
}

/// Write a record to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets permissions to 0600 (owner read/write only) since the
/// file contains an OAuth token.
async fn write_atomic(path: &Path, record: &TokenRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| Error::Parse(format!("serializing credential record: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credential.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential record");
    Ok(())
}

/// In-memory credential store for tests and embedders without durable storage.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: Mutex<Option<TokenRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing record.
    pub fn with_record(record: TokenRecord) -> Self {
        Self {
            state: Mutex::new(Some(record)),
        }
    }

    /// Clone of the current record, if any.
    pub async fn snapshot(&self) -> Option<TokenRecord> {
        self.state.lock().await.clone()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<TokenRecord>>> + Send + '_>> {
        Box::pin(async move { Ok(self.state.lock().await.clone()) })
    }

    fn save(&self, record: TokenRecord) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.lock().await = Some(record);
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.lock().await = None;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenSource;

    fn test_record(suffix: &str) -> TokenRecord {
        TokenRecord {
            value: format!("at_{suffix}"),
            permissions: vec!["email".into()],
            expires_at: 4_102_444_800_000,
            last_refreshed_at: 1_735_500_000_000,
            source: TokenSource::Sso,
        }
    }

    #[tokio::test]
    async fn missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credential.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");

        let store = FileCredentialStore::new(path.clone());
        store.save(test_record("1")).await.unwrap();

        // Load through a fresh store instance
        let store2 = FileCredentialStore::new(path);
        let loaded = store2.load().await.unwrap().unwrap();
        assert_eq!(loaded, test_record("1"));
    }

    #[tokio::test]
    async fn save_replaces_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credential.json"));

        store.save(test_record("old")).await.unwrap();
        store.save(test_record("new")).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.value, "at_new");
    }

    #[tokio::test]
    async fn clear_removes_record_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        let store = FileCredentialStore::new(path.clone());

        store.save(test_record("1")).await.unwrap();
        assert!(path.exists());

        store.clear().await.unwrap();
        assert!(!path.exists());
        assert!(store.load().await.unwrap().is_none());

        // Clearing again is not an error
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let store = FileCredentialStore::new(path);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)), "got: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credential.json");
        let store = FileCredentialStore::new(path.clone());
        store.save(test_record("1")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryCredentialStore::new();
        assert!(store.load().await.unwrap().is_none());

        store.save(test_record("m")).await.unwrap();
        assert_eq!(store.snapshot().await.unwrap().value, "at_m");

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
