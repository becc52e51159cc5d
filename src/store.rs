use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use uuid::Uuid;

use crate::error::StoreError;
use crate::repository::{StagedChange, TaskRepository, UnitOfWork, staged_id};
use crate::task::Task;

// Stay well under SQLITE_MAX_VARIABLE_NUMBER on older builds.
const FETCH_CHUNK: usize = 500;

const TASK_COLUMNS: &str = "identifier, name, notes, priority, complete";

/// SQLite-backed task repository.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Open (or create) a database file and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create the tasks table. Safe to call multiple times.
    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(
            r#"
PRAGMA journal_mode=WAL;

CREATE TABLE IF NOT EXISTS tasks (
identifier TEXT PRIMARY KEY,
name TEXT NOT NULL CHECK(length(name) > 0),
notes TEXT,
priority TEXT NOT NULL DEFAULT 'normal' CHECK(priority IN ('low','normal','high','critical')),
complete INTEGER NOT NULL DEFAULT 0,
updated_ms INTEGER NOT NULL
);
"#,
        )?;
        Ok(())
    }

    pub fn get(&self, id: &Uuid) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.lock();
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE identifier=?1"),
                params![id.to_string()],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Every task, ordered by priority then name.
    pub fn list(&self) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks"))?;
        let mut out = stmt
            .query_map([], task_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        out.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(out)
    }

    /// Create or overwrite a task locally. A missing identifier is assigned.
    pub fn save_task(&self, mut task: Task) -> Result<Uuid, StoreError> {
        if task.name.trim().is_empty() {
            return Err(StoreError::Invalid("name must not be empty".into()));
        }
        let id = *task.identifier.get_or_insert_with(Uuid::new_v4);
        let mut uow = UnitOfWork::new(self);
        uow.insert(task)?;
        uow.save()?;
        Ok(id)
    }

    /// Remove a task locally. Removing an unknown id is not an error.
    pub fn delete_task(&self, id: Uuid) -> Result<(), StoreError> {
        let mut uow = UnitOfWork::new(self);
        uow.delete(id);
        uow.save()?;
        Ok(())
    }
}

impl TaskRepository for SqliteTaskStore {
    fn fetch(&self, ids: &[Uuid]) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock();
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(FETCH_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE identifier IN ({placeholders})"
            ))?;
            let rows = stmt.query_map(params_from_iter(chunk.iter().map(Uuid::to_string)), task_from_row)?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    fn commit(&self, changes: Vec<StagedChange>) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now_ms = Utc::now().timestamp_millis();
        for change in &changes {
            match change {
                StagedChange::Insert(t) => {
                    // upsert: two racing pulls may both decide to create the same id
                    tx.execute(
                        "INSERT INTO tasks(identifier,name,notes,priority,complete,updated_ms)
VALUES (?1,?2,?3,?4,?5,?6)
ON CONFLICT(identifier) DO UPDATE SET
name=excluded.name, notes=excluded.notes, priority=excluded.priority,
complete=excluded.complete, updated_ms=excluded.updated_ms",
                        params![
                            staged_id(t)?.to_string(),
                            t.name,
                            t.notes,
                            t.priority.as_str(),
                            t.complete,
                            now_ms,
                        ],
                    )?;
                }
                StagedChange::Update(t) => {
                    tx.execute(
                        "UPDATE tasks SET name=?2, notes=?3, priority=?4, complete=?5, updated_ms=?6
WHERE identifier=?1",
                        params![
                            staged_id(t)?.to_string(),
                            t.name,
                            t.notes,
                            t.priority.as_str(),
                            t.complete,
                            now_ms,
                        ],
                    )?;
                }
                StagedChange::Delete(id) => {
                    tx.execute("DELETE FROM tasks WHERE identifier=?1", params![id.to_string()])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn task_from_row(r: &Row<'_>) -> rusqlite::Result<Task> {
    let id: String = r.get(0)?;
    let priority: String = r.get(3)?;
    Ok(Task {
        identifier: Some(
            Uuid::parse_str(&id)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
        ),
        name: r.get(1)?,
        notes: r.get(2)?,
        priority: priority
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
        complete: r.get(4)?,
    })
}
