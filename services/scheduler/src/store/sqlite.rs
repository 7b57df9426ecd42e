//! SQLite-backed store.
//!
//! Records are kept as JSON bodies keyed by their identity columns so that
//! schema changes in the records do not need migrations.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use berth_id::AppId;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{AppRecord, OfferAllocation, SlotRecord, Store, StoreError};
use crate::state::{Task, Version};

/// SQLite state store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS framework (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                framework_id TEXT
            );

            INSERT OR IGNORE INTO framework (id) VALUES (1);

            CREATE TABLE IF NOT EXISTS apps (
                app_id TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS versions (
                app_id TEXT NOT NULL,
                version_id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (app_id, version_id)
            );

            CREATE TABLE IF NOT EXISTS slots (
                app_id TEXT NOT NULL,
                slot_index INTEGER NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (app_id, slot_index)
            );

            CREATE TABLE IF NOT EXISTS task_history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                app_id TEXT NOT NULL,
                slot_index INTEGER NOT NULL,
                task_id TEXT NOT NULL,
                body TEXT NOT NULL,
                UNIQUE (app_id, slot_index, task_id)
            );

            CREATE TABLE IF NOT EXISTS offer_allocations (
                app_id TEXT NOT NULL,
                slot_index INTEGER NOT NULL,
                offer_id TEXT NOT NULL,
                PRIMARY KEY (app_id, slot_index)
            );
            "#,
        )?;

        debug!("Scheduler store schema initialized");
        Ok(())
    }

    /// Run a single-column body query and decode every row.
    fn query_bodies<T, P>(&self, sql: &str, params: P) -> Result<Vec<T>, StoreError>
    where
        T: DeserializeOwned,
        P: rusqlite::Params,
    {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let bodies = stmt
            .query_map(params, |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(StoreError::from))
            .collect()
    }
}

impl Store for SqliteStore {
    fn list_apps(&self) -> Result<Vec<AppRecord>, StoreError> {
        self.query_bodies("SELECT body FROM apps ORDER BY app_id", [])
    }

    fn list_versions(&self, app_id: &AppId) -> Result<Vec<Version>, StoreError> {
        self.query_bodies(
            "SELECT body FROM versions WHERE app_id = ?1 ORDER BY version_id",
            params![app_id.to_string()],
        )
    }

    fn list_slots(&self, app_id: &AppId) -> Result<Vec<SlotRecord>, StoreError> {
        self.query_bodies(
            "SELECT body FROM slots WHERE app_id = ?1 ORDER BY slot_index",
            params![app_id.to_string()],
        )
    }

    fn list_tasks(&self, app_id: &AppId, slot_index: u32) -> Result<Vec<Task>, StoreError> {
        self.query_bodies(
            "SELECT body FROM task_history WHERE app_id = ?1 AND slot_index = ?2 ORDER BY seq",
            params![app_id.to_string(), slot_index],
        )
    }

    fn list_offer_allocations(&self) -> Result<Vec<OfferAllocation>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT app_id, slot_index, offer_id FROM offer_allocations ORDER BY app_id, slot_index",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(app_id, slot_index, offer_id)| {
                let app_id = app_id
                    .parse()
                    .map_err(|e| StoreError::Corrupt(format!("bad app id {app_id}: {e}")))?;
                Ok(OfferAllocation {
                    app_id,
                    slot_index,
                    offer_id,
                })
            })
            .collect()
    }

    fn get_framework_id(&self) -> Result<Option<String>, StoreError> {
        let framework_id: Option<Option<String>> = self
            .conn()?
            .query_row("SELECT framework_id FROM framework WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(framework_id.flatten())
    }

    fn set_framework_id(&self, framework_id: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "UPDATE framework SET framework_id = ?1 WHERE id = 1",
            params![framework_id],
        )?;
        Ok(())
    }

    fn save_app(&self, app: &AppRecord) -> Result<(), StoreError> {
        let body = serde_json::to_string(app)?;
        self.conn()?.execute(
            "INSERT INTO apps (app_id, body) VALUES (?1, ?2)
             ON CONFLICT(app_id) DO UPDATE SET body = excluded.body",
            params![app.id.to_string(), body],
        )?;
        Ok(())
    }

    fn save_version(&self, version: &Version) -> Result<(), StoreError> {
        let body = serde_json::to_string(version)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO versions (app_id, version_id, body) VALUES (?1, ?2, ?3)",
            params![version.app_id.to_string(), version.id.to_string(), body],
        )?;
        Ok(())
    }

    fn save_slot(&self, slot: &SlotRecord) -> Result<(), StoreError> {
        let body = serde_json::to_string(slot)?;
        self.conn()?.execute(
            "INSERT INTO slots (app_id, slot_index, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(app_id, slot_index) DO UPDATE SET body = excluded.body",
            params![slot.app_id.to_string(), slot.index, body],
        )?;
        Ok(())
    }

    fn append_task_history(
        &self,
        app_id: &AppId,
        slot_index: u32,
        task: &Task,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(task)?;
        self.conn()?.execute(
            "INSERT OR IGNORE INTO task_history (app_id, slot_index, task_id, body) \
             VALUES (?1, ?2, ?3, ?4)",
            params![app_id.to_string(), slot_index, task.id.to_string(), body],
        )?;
        Ok(())
    }

    fn save_offer_allocation(&self, allocation: &OfferAllocation) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO offer_allocations (app_id, slot_index, offer_id) VALUES (?1, ?2, ?3)",
            params![
                allocation.app_id.to_string(),
                allocation.slot_index,
                allocation.offer_id
            ],
        )?;
        Ok(())
    }

    fn delete_offer_allocation(&self, app_id: &AppId, slot_index: u32) -> Result<(), StoreError> {
        self.conn()?.execute(
            "DELETE FROM offer_allocations WHERE app_id = ?1 AND slot_index = ?2",
            params![app_id.to_string(), slot_index],
        )?;
        Ok(())
    }

    fn delete_app(&self, app_id: &AppId) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = app_id.to_string();
        for table in ["apps", "versions", "slots", "task_history", "offer_allocations"] {
            tx.execute(&format!("DELETE FROM {table} WHERE app_id = ?1"), params![id])?;
        }
        tx.commit()?;
        Ok(())
    }
}
