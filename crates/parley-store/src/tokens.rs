//! Persistence of the session token.

use std::path::Path;
use std::sync::Mutex;

use parley_shared::constants::TOKEN_STORAGE_KEY;
use parley_shared::AccessToken;

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Durable storage for the bearer token.
///
/// Implementations are synchronous and cheap; callers may invoke them from
/// async code without spawning a blocking task.
pub trait TokenStorage: Send + Sync {
    fn load_token(&self) -> Result<Option<AccessToken>>;
    fn save_token(&self, token: &AccessToken) -> Result<()>;
    fn clear_token(&self) -> Result<()>;
}

/// Token storage in the SQLite `kv_store` table.
pub struct SqliteTokenStore {
    db: Mutex<Database>,
}

impl SqliteTokenStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Open the client database in `data_dir` (platform default when `None`).
    pub fn open(data_dir: Option<&Path>) -> Result<Self> {
        Ok(Self::new(Database::open(data_dir)?))
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let db = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        f(&db)
    }
}

impl TokenStorage for SqliteTokenStore {
    fn load_token(&self) -> Result<Option<AccessToken>> {
        let raw = self.with_db(|db| db.kv_get(TOKEN_STORAGE_KEY))?;
        Ok(raw.filter(|t| !t.is_empty()).map(AccessToken::new))
    }

    fn save_token(&self, token: &AccessToken) -> Result<()> {
        self.with_db(|db| db.kv_set(TOKEN_STORAGE_KEY, token.as_str()))?;
        tracing::debug!("session token persisted");
        Ok(())
    }

    fn clear_token(&self) -> Result<()> {
        let removed = self.with_db(|db| db.kv_delete(TOKEN_STORAGE_KEY))?;
        tracing::debug!(removed, "session token cleared");
        Ok(())
    }
}

/// Non-durable token storage.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<AccessToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: AccessToken) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

impl TokenStorage for MemoryTokenStore {
    fn load_token(&self) -> Result<Option<AccessToken>> {
        Ok(self.token.lock().map_err(|_| StoreError::Poisoned)?.clone())
    }

    fn save_token(&self, token: &AccessToken) -> Result<()> {
        *self.token.lock().map_err(|_| StoreError::Poisoned)? = Some(token.clone());
        Ok(())
    }

    fn clear_token(&self) -> Result<()> {
        *self.token.lock().map_err(|_| StoreError::Poisoned)? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let token = AccessToken::new("a.b.c");

        {
            let store = SqliteTokenStore::open(Some(dir.path())).unwrap();
            assert!(store.load_token().unwrap().is_none());
            store.save_token(&token).unwrap();
        }

        let store = SqliteTokenStore::open(Some(dir.path())).unwrap();
        assert_eq!(store.load_token().unwrap(), Some(token));

        store.clear_token().unwrap();
        assert!(store.load_token().unwrap().is_none());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTokenStore::new();
        store.save_token(&AccessToken::new("x.y.z")).unwrap();
        assert!(store.load_token().unwrap().is_some());
        store.clear_token().unwrap();
        assert!(store.load_token().unwrap().is_none());
    }
}
