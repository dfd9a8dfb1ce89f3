//! SQLite-backed snapshot store.
//!
//! One `store.db` file in WAL mode holding one row per session key.

use crate::snapshot::{LoadOutcome, SessionKey, Snapshot, SnapshotStore, StoreError};
use gitdojo_core::RepoState;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS snapshots (
    learner_id TEXT NOT NULL,
    practice_id TEXT NOT NULL,
    version INTEGER NOT NULL,
    state_json TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (learner_id, practice_id)
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const SCHEMA_V2_SQL: &str = "
ALTER TABLE snapshots ADD COLUMN history_json TEXT NOT NULL DEFAULT '[]';
CREATE INDEX IF NOT EXISTS idx_snapshots_learner ON snapshots(learner_id);
";

pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
}

impl SqliteSnapshotStore {
    /// Open or create the database with the full schema.
    pub fn open_or_create(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;
        tracing::debug!(path = %db_path.display(), "snapshot store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    #[cfg(test)]
    fn schema_version(&self) -> u32 {
        schema_version(&self.conn().unwrap()).unwrap()
    }
}

fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('version', '1')",
        [],
    )?;
    if schema_version(conn)? < 2 {
        migrate_v1_to_v2(conn)?;
    }
    Ok(())
}

fn schema_version(conn: &Connection) -> Result<u32, StoreError> {
    let version_str: String = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .unwrap_or_else(|_| "1".to_string());
    Ok(version_str.parse().unwrap_or(1))
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('version', ?1)",
        params![version.to_string()],
    )?;
    Ok(())
}

/// v2 records the accepted command history next to the state.
fn migrate_v1_to_v2(conn: &Connection) -> Result<(), StoreError> {
    let tx = conn.unchecked_transaction()?;
    let has_history: bool = tx
        .prepare("SELECT 1 FROM pragma_table_info('snapshots') WHERE name = 'history_json'")?
        .exists([])?;
    if !has_history {
        tx.execute_batch(SCHEMA_V2_SQL)?;
    }
    set_schema_version(&tx, 2)?;
    tx.commit()?;
    tracing::info!("snapshot store migrated to schema v2");
    Ok(())
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

fn decode_state(key: &SessionKey, json: &str) -> Result<RepoState, StoreError> {
    RepoState::from_json(json)?.map_err(|violation| StoreError::Corrupt {
        key: key.to_string(),
        violation,
    })
}

fn encode_state(state: Option<&RepoState>) -> Result<Option<String>, StoreError> {
    Ok(state.map(serde_json::to_string).transpose()?)
}

impl SnapshotStore for SqliteSnapshotStore {
    fn load(&self, key: &SessionKey, current_version: u32) -> Result<LoadOutcome, StoreError> {
        let conn = self.conn()?;
        let row: Option<(u32, Option<String>, String)> = conn
            .query_row(
                "SELECT version, state_json, history_json FROM snapshots
                 WHERE learner_id = ?1 AND practice_id = ?2",
                params![key.learner_id, key.practice_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((version, state_json, history_json)) = row else {
            return Ok(LoadOutcome::Fresh(Snapshot::empty(
                &key.practice_id,
                current_version,
            )));
        };
        if version != current_version {
            tracing::warn!(%key, stored = version, current = current_version, "snapshot version mismatch");
            return Ok(LoadOutcome::ResetRequired {
                stored: version,
                current: current_version,
            });
        }

        let state = state_json
            .as_deref()
            .map(|json| decode_state(key, json))
            .transpose()?;
        let history: Vec<String> = serde_json::from_str(&history_json)?;
        Ok(LoadOutcome::Ready(Snapshot {
            practice_id: key.practice_id.clone(),
            state,
            version,
            history,
        }))
    }

    fn save(&self, key: &SessionKey, snapshot: &Snapshot) -> Result<(), StoreError> {
        let state_json = encode_state(snapshot.state.as_ref())?;
        let history_json = serde_json::to_string(&snapshot.history)?;

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let stored: Option<u32> = tx
            .query_row(
                "SELECT version FROM snapshots WHERE learner_id = ?1 AND practice_id = ?2",
                params![key.learner_id, key.practice_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(stored) = stored {
            if stored != snapshot.version {
                tracing::warn!(%key, stored, attempted = snapshot.version, "refusing cross-version save");
                return Err(StoreError::VersionConflict {
                    key: key.to_string(),
                    stored,
                    attempted: snapshot.version,
                });
            }
        }

        tx.execute(
            "INSERT INTO snapshots (learner_id, practice_id, version, state_json, history_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (learner_id, practice_id) DO UPDATE SET
                 version = excluded.version,
                 state_json = excluded.state_json,
                 history_json = excluded.history_json,
                 updated_at = excluded.updated_at",
            params![
                key.learner_id,
                key.practice_id,
                snapshot.version,
                state_json,
                history_json,
                now_rfc3339(),
            ],
        )?;
        tx.commit()?;
        tracing::info!(%key, version = snapshot.version, commands = snapshot.history.len(), "snapshot saved");
        Ok(())
    }

    fn reset(&self, key: &SessionKey, new_version: u32) -> Result<Snapshot, StoreError> {
        let snapshot = Snapshot::empty(&key.practice_id, new_version);
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM snapshots WHERE learner_id = ?1 AND practice_id = ?2",
            params![key.learner_id, key.practice_id],
        )?;
        tx.execute(
            "INSERT INTO snapshots (learner_id, practice_id, version, state_json, history_json, updated_at)
             VALUES (?1, ?2, ?3, NULL, '[]', ?4)",
            params![key.learner_id, key.practice_id, new_version, now_rfc3339()],
        )?;
        tx.commit()?;
        tracing::info!(%key, version = new_version, "snapshot reset");
        Ok(snapshot)
    }

    fn list(&self, learner_id: &str) -> Result<Vec<(String, u32)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT practice_id, version FROM snapshots WHERE learner_id = ?1 ORDER BY practice_id",
        )?;
        let rows = stmt
            .query_map(params![learner_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl Drop for SqliteSnapshotStore {
    fn drop(&mut self) {
        // Merge WAL back into the main file so an idle store is a single file.
        if let Ok(conn) = self.conn.get_mut() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }
}
