//! Process-wide credential persistence.
//!
//! The store holds the current access/ID/refresh tokens and nothing
//! else — no token-shape validation, no expiry bookkeeping. It is an
//! injectable seam: the reconciler and the session readers only see
//! [`CredentialStore`], so tests swap in [`MemoryCredentialStore`] and
//! the CLI uses [`SqliteCredentialStore`].

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use rusqlite::Connection;

use crate::consts::{ACCESS_TOKEN_KEY, ID_TOKEN_KEY, REFRESH_TOKEN_KEY};

/// The credential bundle issued by the provider.
///
/// An ID token, once written, is treated as valid until the next write
/// or an explicit clear; expiry is the provider's problem at request
/// time.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TokenBundle {
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl TokenBundle {
    pub fn has_id_token(&self) -> bool {
        self.id_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Durable key/value holder for the current tokens.
///
/// `set` fully replaces the stored bundle: a field absent from the
/// bundle is removed from storage, never left at its old value.
pub trait CredentialStore: Send + Sync {
    /// Stored token for one of the keys in [`crate::consts`], or `None`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the whole stored bundle with `bundle`.
    fn set(&self, bundle: &TokenBundle) -> Result<()>;

    /// Remove all three tokens.
    fn clear(&self) -> Result<()>;
}

const TOKEN_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, ID_TOKEN_KEY, REFRESH_TOKEN_KEY];

fn bundle_entries(bundle: &TokenBundle) -> [(&'static str, Option<&String>); 3] {
    [
        (ACCESS_TOKEN_KEY, bundle.access_token.as_ref()),
        (ID_TOKEN_KEY, bundle.id_token.as_ref()),
        (REFRESH_TOKEN_KEY, bundle.refresh_token.as_ref()),
    ]
}

/// SQLite-backed store, durable across process restarts.
///
/// Shared across processes without locking — two concurrent logins
/// race and the last write wins, which is accepted behavior.
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Open or create the credentials table in the given database path.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS credentials (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT value FROM credentials WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn set(&self, bundle: &TokenBundle) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for (key, value) in bundle_entries(bundle) {
            match value {
                Some(value) => {
                    tx.execute(
                        "INSERT INTO credentials (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                        [key, value.as_str()],
                    )?;
                }
                None => {
                    tx.execute("DELETE FROM credentials WHERE key = ?1", [key])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        for key in TOKEN_KEYS {
            conn.execute("DELETE FROM credentials WHERE key = ?1", [key])?;
        }
        Ok(())
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryCredentialStore {
    tokens: Mutex<HashMap<&'static str, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let tokens = self.tokens.lock().unwrap();
        Ok(tokens.get(key).cloned())
    }

    fn set(&self, bundle: &TokenBundle) -> Result<()> {
        let mut tokens = self.tokens.lock().unwrap();
        for (key, value) in bundle_entries(bundle) {
            match value {
                Some(value) => {
                    tokens.insert(key, value.clone());
                }
                None => {
                    tokens.remove(key);
                }
            }
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.tokens.lock().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_store() -> SqliteCredentialStore {
        SqliteCredentialStore::open(":memory:").unwrap()
    }

    fn full_bundle() -> TokenBundle {
        TokenBundle {
            access_token: Some("A1".to_string()),
            id_token: Some("I1".to_string()),
            refresh_token: Some("R1".to_string()),
        }
    }

    #[test]
    fn get_returns_none_when_empty() {
        let store = mem_store();
        assert!(store.get(ID_TOKEN_KEY).unwrap().is_none());
    }

    #[test]
    fn set_and_get_all_three() {
        let store = mem_store();
        store.set(&full_bundle()).unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().unwrap(), "A1");
        assert_eq!(store.get(ID_TOKEN_KEY).unwrap().unwrap(), "I1");
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().unwrap(), "R1");
    }

    #[test]
    fn set_is_full_replacement() {
        let store = mem_store();
        store.set(&full_bundle()).unwrap();

        // A bundle missing the refresh token must remove the stored one.
        store
            .set(&TokenBundle {
                access_token: Some("A2".to_string()),
                id_token: Some("I2".to_string()),
                refresh_token: None,
            })
            .unwrap();

        assert_eq!(store.get(ID_TOKEN_KEY).unwrap().unwrap(), "I2");
        assert!(store.get(REFRESH_TOKEN_KEY).unwrap().is_none());
    }

    #[test]
    fn clear_removes_everything() {
        let store = mem_store();
        store.set(&full_bundle()).unwrap();
        store.clear().unwrap();
        assert!(store.get(ACCESS_TOKEN_KEY).unwrap().is_none());
        assert!(store.get(ID_TOKEN_KEY).unwrap().is_none());
        assert!(store.get(REFRESH_TOKEN_KEY).unwrap().is_none());
    }

    #[test]
    fn memory_store_matches_contract() {
        let store = MemoryCredentialStore::new();
        store.set(&full_bundle()).unwrap();
        assert_eq!(store.get(ID_TOKEN_KEY).unwrap().unwrap(), "I1");

        store
            .set(&TokenBundle {
                id_token: Some("I2".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(store.get(ID_TOKEN_KEY).unwrap().unwrap(), "I2");
        assert!(store.get(ACCESS_TOKEN_KEY).unwrap().is_none());

        store.clear().unwrap();
        assert!(store.get(ID_TOKEN_KEY).unwrap().is_none());
    }

    #[test]
    fn has_id_token_rejects_empty() {
        assert!(!TokenBundle::default().has_id_token());
        assert!(
            !TokenBundle {
                id_token: Some(String::new()),
                ..Default::default()
            }
            .has_id_token()
        );
        assert!(full_bundle().has_id_token());
    }
}
