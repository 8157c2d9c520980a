//! Persisted session record storage.
//!
//! The saved session is two logical entries in client-local key-value
//! storage: `accessToken` (opaque string) and `tokenExpiry` (epoch
//! milliseconds as a string). Absence of either entry, or a parse failure,
//! is treated as "no saved session" rather than an error.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

/// A persisted credential with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedToken {
    /// Opaque access credential.
    #[serde(rename = "accessToken")]
    pub access_token: String,
    /// Absolute expiry, epoch milliseconds, stored as a string.
    #[serde(rename = "tokenExpiry", with = "epoch_millis_string")]
    pub expires_at_ms: i64,
}

mod epoch_millis_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Client-local storage for the persisted session record.
///
/// Implementations must treat a malformed record as absent: a corrupt
/// entry never blocks sign-in, it just loses the saved session.
pub trait TokenStore: Send + Sync {
    /// Load the saved session, if any.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] only for storage-access failures;
    /// a missing or unparseable record is `Ok(None)`.
    fn load(&self) -> Result<Option<SavedToken>>;

    /// Persist the session record, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] when the record cannot be written.
    fn save(&self, token: &SavedToken) -> Result<()>;

    /// Remove the session record. Removing an absent record is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] on storage-access failures.
    fn clear(&self) -> Result<()>;
}

/// File-backed token store (one small JSON file).
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Create a store backed by the given file path.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Default on-disk location (`<config dir>/larder/session.json`).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("larder").join("session.json"))
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<SavedToken>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EngineError::Storage(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };
        match serde_json::from_str(&text) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                warn!("ignoring unparseable session record: {e}");
                Ok(None)
            }
        }
    }

    fn save(&self, token: &SavedToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Storage(format!("cannot create {}: {e}", parent.display())))?;
        }
        let text = serde_json::to_string(token)
            .map_err(|e| EngineError::Storage(format!("cannot serialize session record: {e}")))?;
        std::fs::write(&self.path, text)
            .map_err(|e| EngineError::Storage(format!("cannot write {}: {e}", self.path.display())))?;
        debug!("saved session record to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::Storage(format!(
                "cannot remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}

/// In-memory token store for tests and embedders with their own persistence.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<SavedToken>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<SavedToken>> {
        Ok(self
            .token
            .lock()
            .map_err(|_| EngineError::Storage("token store poisoned".to_owned()))?
            .clone())
    }

    fn save(&self, token: &SavedToken) -> Result<()> {
        *self
            .token
            .lock()
            .map_err(|_| EngineError::Storage("token store poisoned".to_owned()))? =
            Some(token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self
            .token
            .lock()
            .map_err(|_| EngineError::Storage("token store poisoned".to_owned()))? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_with_string_expiry() {
        let token = SavedToken {
            access_token: "ya29.token".to_owned(),
            expires_at_ms: 1_756_400_000_000,
        };
        let json = serde_json::to_string(&token).unwrap();
        assert!(json.contains(r#""accessToken":"ya29.token""#));
        assert!(json.contains(r#""tokenExpiry":"1756400000000""#));

        let back: SavedToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("session.json"));

        assert_eq!(store.load().unwrap(), None);

        let token = SavedToken {
            access_token: "tok".to_owned(),
            expires_at_ms: 42,
        };
        store.save(&token).unwrap();
        assert_eq!(store.load().unwrap(), Some(token));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[test]
    fn corrupt_record_reads_as_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{\"accessToken\": 12}").unwrap();
        let store = FileTokenStore::new(path.clone());
        assert_eq!(store.load().unwrap(), None);

        // Non-numeric expiry is also "no saved session".
        std::fs::write(&path, r#"{"accessToken":"t","tokenExpiry":"soon"}"#).unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.load().unwrap(), None);
        let token = SavedToken {
            access_token: "tok".to_owned(),
            expires_at_ms: 7,
        };
        store.save(&token).unwrap();
        assert_eq!(store.load().unwrap(), Some(token));
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
