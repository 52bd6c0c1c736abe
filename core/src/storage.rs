use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{LarderError, Result};
use crate::models::{Day, Product};

pub const CATALOG_KEY: &str = "products";
pub const TOMBSTONES_KEY: &str = "deleted_products";
/// Id-based deletion list written by older clients. Absorbed into the ledger on load.
pub const LEGACY_TOMBSTONES_KEY: &str = "deleted_ids";
pub const FAVORITES_KEY: &str = "favorites";
pub const DAY_PREFIX: &str = "day:";

/// Opaque key-value backend. Values are JSON text; the backend never looks inside.
pub trait Storage: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<String>>;
    fn set_raw(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<bool>;
    /// Keys starting with `prefix`, in ascending order.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
        self.records
            .lock()
            .map_err(|_| LarderError::Storage("memory store lock poisoned".to_string()))
    }
}

impl Storage for MemoryStorage {
    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            LarderError::Storage(format!("Failed to open database {}: {e}", path.display()))
        })?;
        let store = SqliteStorage {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStorage {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LarderError::Storage("database lock poisoned".to_string()))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS records (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }
}

impl Storage for SqliteStorage {
    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM records WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO records (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute("DELETE FROM records WHERE key = ?1", params![key])?;
        Ok(n > 0)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix_len = i64::try_from(prefix.chars().count()).unwrap_or(i64::MAX);
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT key FROM records WHERE substr(key, 1, ?2) = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![prefix, prefix_len], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }
}

/// Read and parse a JSON record. `Ok(None)` means nothing is stored under `key`.
pub fn read_json<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Result<Option<T>> {
    let Some(raw) = storage.get_raw(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| LarderError::MalformedStorageRecord {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

pub fn write_json<T: Serialize + ?Sized>(storage: &dyn Storage, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)
        .map_err(|e| LarderError::Storage(format!("Failed to serialize '{key}': {e}")))?;
    storage.set_raw(key, &raw)
}

#[must_use]
pub fn day_key(date: NaiveDate) -> String {
    format!("{DAY_PREFIX}{}", date.format("%Y-%m-%d"))
}

pub fn load_day(storage: &dyn Storage, date: NaiveDate) -> Result<Day> {
    Ok(read_json(storage, &day_key(date))?.unwrap_or_else(|| Day::empty(date)))
}

pub fn save_day(storage: &dyn Storage, day: &Day) -> Result<()> {
    write_json(storage, &day_key(day.date), day)
}

pub fn load_catalog(storage: &dyn Storage) -> Result<Vec<Product>> {
    Ok(read_json(storage, CATALOG_KEY)?.unwrap_or_default())
}

pub fn save_catalog(storage: &dyn Storage, products: &[Product]) -> Result<()> {
    write_json(storage, CATALOG_KEY, products)
}

/// Dates of every stored day record. Keys that do not carry a valid date are ignored.
pub fn day_dates(storage: &dyn Storage) -> Result<Vec<NaiveDate>> {
    Ok(storage
        .keys_with_prefix(DAY_PREFIX)?
        .iter()
        .filter_map(|k| {
            k.strip_prefix(DAY_PREFIX)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Meal;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn exercise_backend(storage: &dyn Storage) {
        assert_eq!(storage.get_raw("missing").unwrap(), None);
        storage.set_raw("day:2025-06-02", "{}").unwrap();
        storage.set_raw("day:2025-06-01", "{}").unwrap();
        storage.set_raw("products", "[]").unwrap();
        storage.set_raw("products", "[1]").unwrap();
        assert_eq!(storage.get_raw("products").unwrap().as_deref(), Some("[1]"));
        assert_eq!(
            storage.keys_with_prefix("day:").unwrap(),
            vec!["day:2025-06-01".to_string(), "day:2025-06-02".to_string()]
        );
        assert!(storage.remove("products").unwrap());
        assert!(!storage.remove("products").unwrap());
    }

    #[test]
    fn test_memory_backend() {
        exercise_backend(&MemoryStorage::new());
    }

    #[test]
    fn test_sqlite_backend() {
        exercise_backend(&SqliteStorage::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("larder.db");
        {
            let store = SqliteStorage::open(&path).unwrap();
            store.set_raw("favorites", "[\"p1\"]").unwrap();
        }
        let store = SqliteStorage::open(&path).unwrap();
        assert_eq!(
            store.get_raw("favorites").unwrap().as_deref(),
            Some("[\"p1\"]")
        );
    }

    #[test]
    fn test_read_json_distinguishes_missing_from_corrupt() {
        let storage = MemoryStorage::new();
        let missing: Option<Vec<Product>> = read_json(&storage, CATALOG_KEY).unwrap();
        assert!(missing.is_none());

        storage.set_raw(CATALOG_KEY, "{not json").unwrap();
        let err = read_json::<Vec<Product>>(&storage, CATALOG_KEY).unwrap_err();
        assert!(matches!(err, LarderError::MalformedStorageRecord { ref key, .. } if key == "products"));
    }

    #[test]
    fn test_day_round_trip_and_dates() {
        let storage = MemoryStorage::new();
        let d = date("2025-06-01");
        assert!(load_day(&storage, d).unwrap().meals.is_empty());

        let day = Day {
            date: d,
            meals: vec![Meal {
                id: "m1".to_string(),
                time: Some("08:00".to_string()),
                items: vec![],
                meal_type_override: None,
            }],
        };
        save_day(&storage, &day).unwrap();
        storage.set_raw("day:garbage", "{}").unwrap();

        assert_eq!(load_day(&storage, d).unwrap(), day);
        assert_eq!(day_dates(&storage).unwrap(), vec![d]);
    }
}
