use anyhow::Result;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{path::Path, thread, time::Duration};

/** \brief Key holding the JSON map of provider -> credential record. */
pub const API_KEYS_KEY: &str = "ultimateai_api_keys";
/** \brief Key holding the selected provider identifier. */
pub const SELECTED_PROVIDER_KEY: &str = "ultimateai_selected_provider";
pub const WELCOME_SEEN_KEY: &str = "ultimateai_welcome_seen";
pub const TELEMETRY_ENABLED_KEY: &str = "ultimateai_telemetry_enabled";
/** \brief Namespaced blob for the exam-prep session state. */
pub const EXAM_STATE_KEY: &str = "exam_prep_minimal_v1";

const DEFAULT_DB_PATH: &str = "ultimate-ai.db";

/**
 * \brief Durable string key/value storage backed by a single SQLite table.
 * \details Mirrors the browser `localStorage` contract: string keys, string
 *          values, last write wins.
 */
pub struct LocalStorage {
    conn: Connection,
}

impl LocalStorage {
    /**
     * \brief Open the database named by `ULTIMATEAI_DB` (default `ultimate-ai.db`) and migrate it.
     */
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("ULTIMATEAI_DB").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
        Self::open(path)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    /**
     * \brief In-memory storage, used by tests and throwaway sessions.
     */
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM local_storage WHERE key=?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<()> {
        retry_on_locked(|| {
            self.conn.execute(
                "INSERT INTO local_storage (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
                params![key, value],
            )
        })?;
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<()> {
        retry_on_locked(|| {
            self.conn
                .execute("DELETE FROM local_storage WHERE key=?1", params![key])
        })?;
        Ok(())
    }

    /**
     * \brief Remove several keys in one transaction.
     */
    pub fn remove_items(&mut self, keys: &[&str]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for key in keys {
            tx.execute("DELETE FROM local_storage WHERE key=?1", params![key])?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self
            .get_item(key)?
            .map(|s| s == "1" || s == "true")
            .unwrap_or(default))
    }

    pub fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set_item(key, if value { "1" } else { "0" })
    }

    pub fn welcome_seen(&self) -> Result<bool> {
        self.get_bool(WELCOME_SEEN_KEY, false)
    }

    pub fn mark_welcome_seen(&self) -> Result<()> {
        self.set_bool(WELCOME_SEEN_KEY, true)
    }

    pub fn telemetry_enabled(&self) -> Result<bool> {
        self.get_bool(TELEMETRY_ENABLED_KEY, false)
    }

    pub fn set_telemetry_enabled(&self, enabled: bool) -> Result<()> {
        self.set_bool(TELEMETRY_ENABLED_KEY, enabled)
    }

    /** \brief Reject every write while `on`. */
    #[cfg(test)]
    pub(crate) fn set_read_only(&self, on: bool) -> Result<()> {
        self.conn.pragma_update(None, "query_only", on)?;
        Ok(())
    }
}

/**
 * \brief Create the storage table when missing.
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        CREATE TABLE IF NOT EXISTS local_storage (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

/**
 * \brief Retry helper for SQLite lock contention.
 * \details Retries `database is locked` / `database table is locked` with a
 *          linear backoff, at most 6 attempts.
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    let mut attempt = 0;
    loop {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                attempt += 1;
                thread::sleep(Duration::from_millis(200 * attempt as u64));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_storage() -> LocalStorage {
        LocalStorage::open_in_memory().expect("open in-memory storage")
    }

    #[test]
    fn test_set_get_overwrite_remove() {
        let storage = mem_storage();
        assert_eq!(storage.get_item("k").unwrap(), None);

        storage.set_item("k", "v1").expect("set");
        storage.set_item("k", "v2").expect("overwrite");
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("v2"));

        storage.remove_item("k").expect("remove");
        assert_eq!(storage.get_item("k").unwrap(), None);
        storage.remove_item("k").expect("remove missing is a no-op");
    }

    #[test]
    fn test_remove_items_only_touches_named_keys() {
        let mut storage = mem_storage();
        storage.set_item("a", "1").unwrap();
        storage.set_item("b", "2").unwrap();
        storage.set_item("c", "3").unwrap();

        storage.remove_items(&["a", "b"]).expect("bulk remove");
        assert_eq!(storage.get_item("a").unwrap(), None);
        assert_eq!(storage.get_item("b").unwrap(), None);
        assert_eq!(storage.get_item("c").unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn test_flags_default_and_persist() {
        let storage = mem_storage();
        assert!(!storage.welcome_seen().unwrap());
        storage.mark_welcome_seen().unwrap();
        assert!(storage.welcome_seen().unwrap());

        assert!(!storage.telemetry_enabled().unwrap());
        storage.set_telemetry_enabled(true).unwrap();
        assert!(storage.telemetry_enabled().unwrap());
        storage.set_telemetry_enabled(false).unwrap();
        assert!(!storage.telemetry_enabled().unwrap());
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let path = std::env::temp_dir().join(format!("ultimate-ai-{}.db", uuid::Uuid::new_v4()));
        {
            let storage = LocalStorage::open(&path).expect("open file storage");
            storage.set_item(SELECTED_PROVIDER_KEY, "mistral").unwrap();
        }
        let reopened = LocalStorage::open(&path).expect("reopen");
        assert_eq!(
            reopened.get_item(SELECTED_PROVIDER_KEY).unwrap().as_deref(),
            Some("mistral")
        );
        drop(reopened);
        let _ = std::fs::remove_file(&path);
    }
}
