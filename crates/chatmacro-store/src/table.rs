//! SQLite FTS5 macro table: durable, full-text searchable macro storage.
//!
//! One virtual table with trigram tokenization so partial matches work
//! without stemming. FTS5 tables cannot be altered in place, so schema
//! changes go through [`MacroTable::recreate_table`].

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chatmacro_core::error::{MacroError, Result};
use chatmacro_core::macros::{Macro, MacroColumn};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, params_from_iter};

/// Bound-parameter ceiling every batched statement stays under.
pub const MAX_BOUND_PARAMS: usize = 999;
/// Rows per batched INSERT (7 bound parameters each, stays under 999).
pub const INSERT_CHUNK: usize = 100;
/// Rows per batched DELETE (1 bound parameter each).
pub const DELETE_CHUNK: usize = 500;

const SCHEMA: &str = "
    CREATE VIRTUAL TABLE IF NOT EXISTS macros USING fts5(
        name,
        path,
        command,
        args UNINDEXED,
        tags,
        content UNINDEXED,
        loop UNINDEXED,
        tokenize = 'trigram'
    );";

/// Shared SELECT column list.
const MACRO_SELECT: &str = "SELECT name, path, command, args, tags, content, loop FROM macros";

/// What kind of mutation an `on_change` notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update(MacroColumn),
    Delete,
    DeleteAll,
    Recreate,
}

/// Payload of the `on_change` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroChange {
    pub kind: ChangeKind,
    pub affected: usize,
}

/// Result of a (possibly chunked) mutating call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows changed.
    pub affected: usize,
    /// Batched statements issued against the backend.
    pub statements: usize,
}

type ChangeObserver = Arc<dyn Fn(&MacroChange) + Send + Sync>;

/// Full-text indexed macro table.
pub struct MacroTable {
    conn: Mutex<Connection>,
    observers: Mutex<Vec<ChangeObserver>>,
    insert_chunk: usize,
    delete_chunk: usize,
}

fn storage(e: impl std::fmt::Display) -> MacroError {
    MacroError::Storage(e.to_string())
}

/// SQLite's own message for a failed batch, without the statement text.
fn batch_reason(e: &rusqlite::Error) -> String {
    match e {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.clone(),
        other => {
            // Prepare errors append the offending statement after " in ".
            let full = other.to_string();
            full.split(" in ").next().unwrap_or(&full).to_string()
        }
    }
}

fn batch_failed(attempted: usize) -> impl Fn(rusqlite::Error) -> MacroError {
    move |e| MacroError::BatchFailed {
        attempted,
        reason: batch_reason(&e),
    }
}

/// Map a database row to a Macro.
fn row_to_macro(row: &rusqlite::Row) -> rusqlite::Result<Macro> {
    let tags = match row.get::<_, Option<String>>(4)? {
        Some(json) if !json.trim().is_empty() => serde_json::from_str::<BTreeSet<String>>(&json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        _ => BTreeSet::new(),
    };
    Ok(Macro {
        name: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
        path: row.get(1)?,
        command: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        args: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        tags,
        content: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        looping: row.get::<_, Option<i64>>(6)?.unwrap_or(0) != 0,
    })
}

/// Bound value for one column of a macro.
fn column_value(m: &Macro, column: MacroColumn) -> Value {
    match column {
        MacroColumn::Name => Value::Text(m.name.clone()),
        MacroColumn::Path => Value::Text(m.path.clone()),
        MacroColumn::Command => Value::Text(m.command.clone()),
        MacroColumn::Args => Value::Text(m.args.clone()),
        MacroColumn::Tags => {
            Value::Text(serde_json::to_string(&m.tags).unwrap_or_else(|_| "[]".into()))
        }
        MacroColumn::Content => Value::Text(m.content.clone()),
        MacroColumn::Loop => Value::Integer(m.looping as i64),
    }
}

/// Bound value for a `find_by` lookup.
fn lookup_value(column: MacroColumn, value: &str) -> Value {
    match column {
        MacroColumn::Loop => {
            let on = matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
            Value::Integer(on as i64)
        }
        _ => Value::Text(value.to_string()),
    }
}

fn placeholders(rows: usize, columns: usize) -> String {
    let row = format!("({})", vec!["?"; columns].join(", "));
    vec![row; rows].join(", ")
}

impl MacroTable {
    /// Open or create the macro database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| storage(format!("DB open: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(|e| storage(format!("DB pragma: {e}")))?;
        let table = Self::from_connection(conn)?;
        tracing::info!("🗄️ Macro table opened at {}", path.display());
        Ok(table)
    }

    /// Open a private in-memory table.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| storage(format!("Migration: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
            observers: Mutex::new(Vec::new()),
            insert_chunk: INSERT_CHUNK,
            delete_chunk: DELETE_CHUNK,
        })
    }

    /// Override chunk sizes, clamped so no statement binds more than
    /// [`MAX_BOUND_PARAMS`] parameters.
    pub fn with_chunk_sizes(mut self, insert_chunk: usize, delete_chunk: usize) -> Self {
        self.insert_chunk = insert_chunk.clamp(1, MAX_BOUND_PARAMS / MacroColumn::ALL.len());
        self.delete_chunk = delete_chunk.clamp(1, MAX_BOUND_PARAMS);
        self
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| storage(format!("DB lock poisoned: {e}")))
    }

    /// Register an observer for successful mutations.
    pub fn subscribe<F>(&self, observer: F)
    where
        F: Fn(&MacroChange) + Send + Sync + 'static,
    {
        if let Ok(mut observers) = self.observers.lock() {
            observers.push(Arc::new(observer));
        }
    }

    /// Fire `on_change` once, on the calling thread, when rows were affected.
    fn notify(&self, kind: ChangeKind, affected: usize) {
        if affected == 0 {
            return;
        }
        let observers: Vec<ChangeObserver> = match self.observers.lock() {
            Ok(o) => o.clone(),
            Err(_) => return,
        };
        let change = MacroChange { kind, affected };
        for observer in observers {
            observer(&change);
        }
    }

    // ─── Reads ──────────────────────────────────────────────

    /// All macros.
    pub fn list(&self) -> Result<Vec<Macro>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{MACRO_SELECT} ORDER BY path")).map_err(storage)?;
        let rows = stmt
            .query_map([], row_to_macro)
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(rows)
    }

    /// Exact lookup on one column, at most one record.
    pub fn find_by(&self, column: MacroColumn, value: &str) -> Result<Option<Macro>> {
        let conn = self.conn()?;
        let sql = format!("{MACRO_SELECT} WHERE {} = ?1 LIMIT 1", column.as_str());
        conn.query_row(&sql, [lookup_value(column, value)], row_to_macro)
            .optional()
            .map_err(storage)
    }

    /// Full-text query ranked by FTS5's native relevance.
    ///
    /// The query string is passed through as-is, so boolean operators,
    /// column filters (`tags:raid`), prefixes and `NOT` all work.
    pub fn search(&self, query: &str) -> Result<Vec<Macro>> {
        if query.trim().is_empty() {
            return self.list();
        }
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{MACRO_SELECT} WHERE macros MATCH ?1 ORDER BY rank"))
            .map_err(storage)?;
        let rows = stmt
            .query_map([query], row_to_macro)
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        Ok(rows)
    }

    /// Number of stored macros.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        conn.query_row("SELECT COUNT(*) FROM macros", [], |r| r.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(storage)
    }

    // ─── Writes ─────────────────────────────────────────────

    /// Insert one macro, replacing any row with the same path.
    pub fn insert(&self, m: &Macro) -> Result<BatchOutcome> {
        self.insert_all(std::slice::from_ref(m))
    }

    /// Insert many macros in chunks, replacing rows with the same path.
    ///
    /// All chunks run in one transaction: a failing chunk rolls back the
    /// whole call and reports how many rows had been attempted.
    pub fn insert_all(&self, macros: &[Macro]) -> Result<BatchOutcome> {
        // Later duplicates win, matching set semantics.
        let mut unique: Vec<&Macro> = Vec::with_capacity(macros.len());
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(macros.len());
        for m in macros {
            match index.get(m.path.as_str()) {
                Some(&idx) => unique[idx] = m,
                None => {
                    index.insert(&m.path, unique.len());
                    unique.push(m);
                }
            }
        }
        if unique.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(storage)?;
        let mut outcome = BatchOutcome::default();
        let mut attempted = 0;

        for chunk in unique.chunks(self.insert_chunk) {
            attempted += chunk.len();

            let paths: Vec<Value> = chunk.iter().map(|m| Value::Text(m.path.clone())).collect();
            tx.execute(
                &format!("DELETE FROM macros WHERE path IN ({})", vec!["?"; paths.len()].join(", ")),
                params_from_iter(paths.iter()),
            )
            .map_err(batch_failed(attempted))?;

            let values: Vec<Value> = chunk
                .iter()
                .flat_map(|m| MacroColumn::ALL.iter().map(move |c| column_value(m, *c)))
                .collect();
            let sql = format!(
                "INSERT INTO macros (name, path, command, args, tags, content, loop) VALUES {}",
                placeholders(chunk.len(), MacroColumn::ALL.len())
            );
            outcome.affected += tx
                .execute(&sql, params_from_iter(values.iter()))
                .map_err(batch_failed(attempted))?;
            outcome.statements += 1;
            tracing::debug!("💾 Inserted batch of {} macro(s)", chunk.len());
        }

        tx.commit().map_err(batch_failed(attempted))?;
        drop(conn);

        self.notify(ChangeKind::Insert, outcome.affected);
        Ok(outcome)
    }

    /// Rewrite exactly one column of the row keyed by `old_path`
    /// (defaults to `m.path`). Updating `Path` renames the macro and fails
    /// with `PathCollision`, changing nothing, if another row owns `m.path`.
    pub fn update(&self, column: MacroColumn, m: &Macro, old_path: Option<&str>) -> Result<BatchOutcome> {
        let key = old_path.unwrap_or(&m.path);
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(storage)?;
        if column == MacroColumn::Path && key != m.path {
            let taken: i64 = tx
                .query_row("SELECT COUNT(*) FROM macros WHERE path = ?1", [&m.path], |r| r.get(0))
                .map_err(storage)?;
            if taken > 0 {
                return Err(MacroError::PathCollision(m.path.clone()));
            }
        }
        let sql = format!("UPDATE macros SET {} = ?1 WHERE path = ?2", column.as_str());
        let affected = tx
            .execute(&sql, rusqlite::params![column_value(m, column), key])
            .map_err(storage)?;
        tx.commit().map_err(storage)?;
        drop(conn);

        self.notify(ChangeKind::Update(column), affected);
        Ok(BatchOutcome { affected, statements: 1 })
    }

    /// Delete one macro by path.
    pub fn delete(&self, m: &Macro) -> Result<BatchOutcome> {
        self.delete_all_of(std::slice::from_ref(m))
    }

    /// Delete many macros by path, in chunks, in one transaction.
    pub fn delete_all_of(&self, macros: &[Macro]) -> Result<BatchOutcome> {
        if macros.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(storage)?;
        let mut outcome = BatchOutcome::default();
        let mut attempted = 0;

        for chunk in macros.chunks(self.delete_chunk) {
            attempted += chunk.len();
            let paths: Vec<Value> = chunk.iter().map(|m| Value::Text(m.path.clone())).collect();
            let sql = format!("DELETE FROM macros WHERE path IN ({})", vec!["?"; paths.len()].join(", "));
            outcome.affected += tx
                .execute(&sql, params_from_iter(paths.iter()))
                .map_err(batch_failed(attempted))?;
            outcome.statements += 1;
        }

        tx.commit().map_err(batch_failed(attempted))?;
        drop(conn);

        self.notify(ChangeKind::Delete, outcome.affected);
        Ok(outcome)
    }

    /// Delete every macro.
    pub fn delete_all(&self) -> Result<BatchOutcome> {
        let conn = self.conn()?;
        let affected = conn.execute("DELETE FROM macros", []).map_err(storage)?;
        drop(conn);

        self.notify(ChangeKind::DeleteAll, affected);
        Ok(BatchOutcome { affected, statements: 1 })
    }

    /// Drop and recreate the virtual table. Used only by version migration.
    pub fn recreate_table(&self) -> Result<BatchOutcome> {
        let conn = self.conn()?;
        let existing = conn
            .query_row("SELECT COUNT(*) FROM macros", [], |r| r.get::<_, i64>(0))
            .unwrap_or(0) as usize;
        conn.execute_batch(&format!("DROP TABLE IF EXISTS macros; {SCHEMA}"))
            .map_err(|e| storage(format!("Recreate: {e}")))?;
        drop(conn);

        tracing::info!("🔄 Macro table recreated ({existing} row(s) dropped)");
        self.notify(ChangeKind::Recreate, existing);
        Ok(BatchOutcome { affected: existing, statements: 2 })
    }
}
