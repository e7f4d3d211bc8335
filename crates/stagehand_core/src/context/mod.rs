//! Shared persistence session owning the connection and staged changes.
//!
//! # Responsibility
//! - Track staged mutations across all entity types in staging order.
//! - Flush the whole staged log in one all-or-nothing transaction.
//! - Gate every operation on the released/disposed state of the session.
//!
//! # Invariants
//! - One `StoreContext` is owned by exactly one `UnitOfWork`.
//! - After `release`, every operation fails with `StoreError::Disposed`.
//! - A failed flush leaves the staged log intact and the store unchanged.

use crate::db::DbError;
use crate::entity::{value_text, Entity};
use log::{debug, error, info};
use rusqlite::types::Value;
use rusqlite::Connection;
use std::cell::RefCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub(crate) mod tracker;

use tracker::{Staged, StagedOp};

pub type StoreResult<T> = Result<T, StoreError>;

/// Error surface shared by context, repository and unit-of-work layers.
#[derive(Debug)]
pub enum StoreError {
    /// Transport failure from the persistence engine, passed through.
    Db(DbError),
    /// Operation on a released session or disposed unit of work.
    Disposed,
    /// `update` on an entity neither staged for insert nor present in
    /// storage.
    Untracked { table: &'static str, key: String },
    /// A staged update or delete matched no row at flush time.
    NotFound { table: &'static str, key: String },
    /// A staged mutation failed at flush time; identifies the operation
    /// and carries the engine's diagnostic unmodified.
    Commit {
        table: &'static str,
        op: &'static str,
        source: DbError,
    },
    /// Persisted state that cannot be parsed back into an entity.
    InvalidData(String),
    /// Include list referenced a relation the entity does not declare.
    UnknownRelation {
        table: &'static str,
        relation: String,
    },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Disposed => write!(f, "store context has been disposed"),
            Self::Untracked { table, key } => {
                write!(f, "entity {key} is not tracked or attachable in {table}")
            }
            Self::NotFound { table, key } => {
                write!(f, "no row with key {key} in {table}")
            }
            Self::Commit { table, op, source } => {
                write!(f, "staged {op} on {table} failed at commit: {source}")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::UnknownRelation { table, relation } => {
                write!(f, "unknown relation `{relation}` on {table}")
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Commit { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

struct SessionState {
    /// `None` once the session has been released.
    conn: Option<Connection>,
    staged: Vec<Box<dyn StagedOp>>,
}

/// Shared persistence session backing one unit of work.
///
/// Interior mutability keeps repository handles cheap to share within a
/// single-threaded unit of work; the context is deliberately not `Sync`.
pub struct StoreContext {
    state: RefCell<SessionState>,
}

impl StoreContext {
    pub fn new(conn: Connection) -> Self {
        Self {
            state: RefCell::new(SessionState {
                conn: Some(conn),
                staged: Vec::new(),
            }),
        }
    }

    /// Runs a read against the owned connection.
    pub(crate) fn with_conn<R>(
        &self,
        f: impl FnOnce(&Connection) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let state = self.state.borrow();
        let conn = state.conn.as_ref().ok_or(StoreError::Disposed)?;
        f(conn)
    }

    /// Stages an insert; no persisted effect until `save_changes`.
    pub(crate) fn stage_insert<T: Entity>(&self, entity: T) -> StoreResult<()> {
        let mut state = self.state.borrow_mut();
        if state.conn.is_none() {
            return Err(StoreError::Disposed);
        }
        debug!(
            "event=stage module=context op=insert table={} key={}",
            T::TABLE,
            value_text(&entity.key_value())
        );
        state.staged.push(Box::new(Staged::Insert(entity)));
        Ok(())
    }

    /// Stages a delete by key; no persisted effect until `save_changes`.
    pub(crate) fn stage_delete<T: Entity>(&self, key: Value) -> StoreResult<()> {
        let mut state = self.state.borrow_mut();
        if state.conn.is_none() {
            return Err(StoreError::Disposed);
        }
        debug!(
            "event=stage module=context op=delete table={} key={}",
            T::TABLE,
            value_text(&key)
        );
        state.staged.push(Box::new(Staged::<T>::Delete(key)));
        Ok(())
    }

    /// Marks an entity's current state as modified.
    ///
    /// The entity must be tracked (staged for insert in this session) or
    /// attachable (present in storage). A staged insert with the same key
    /// is replaced in place, so commit writes the latest field values.
    pub(crate) fn record_update<T: Entity>(&self, entity: &T) -> StoreResult<()> {
        let state = &mut *self.state.borrow_mut();
        let conn = state.conn.as_ref().ok_or(StoreError::Disposed)?;
        let key = entity.key_value();

        for op in state.staged.iter_mut() {
            if let Some(Staged::Insert(pending)) = op.as_any_mut().downcast_mut::<Staged<T>>() {
                if pending.key_value() == key {
                    *pending = entity.clone();
                    debug!(
                        "event=stage module=context op=update table={} key={} merged_into=insert",
                        T::TABLE,
                        value_text(&key)
                    );
                    return Ok(());
                }
            }
        }

        if !row_exists::<T>(conn, &key)? {
            return Err(StoreError::Untracked {
                table: T::TABLE,
                key: value_text(&key),
            });
        }

        debug!(
            "event=stage module=context op=update table={} key={}",
            T::TABLE,
            value_text(&key)
        );
        state.staged.push(Box::new(Staged::Update(entity.clone())));
        Ok(())
    }

    /// Returns the latest staged insert with the given key, if any.
    pub(crate) fn find_staged_insert<T: Entity>(&self, key: &Value) -> StoreResult<Option<T>> {
        let state = self.state.borrow();
        if state.conn.is_none() {
            return Err(StoreError::Disposed);
        }
        for op in state.staged.iter().rev() {
            if let Some(Staged::Insert(pending)) = op.as_any().downcast_ref::<Staged<T>>() {
                if pending.key_value() == *key {
                    return Ok(Some(pending.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Flushes every staged mutation in one transaction, staging order
    /// preserved. All-or-nothing: on failure the transaction rolls back
    /// and the staged log is kept.
    pub fn save_changes(&self) -> StoreResult<()> {
        let started_at = Instant::now();
        let SessionState { conn, staged } = &mut *self.state.borrow_mut();
        let conn = conn.as_mut().ok_or(StoreError::Disposed)?;

        let ops = staged.len();
        let tx = conn.transaction()?;
        for op in staged.iter() {
            op.apply(&tx).map_err(|err| {
                let failure = match err {
                    StoreError::Db(source) => StoreError::Commit {
                        table: op.table(),
                        op: op.kind(),
                        source,
                    },
                    other => other,
                };
                error!(
                    "event=save_changes module=context status=error ops={ops} duration_ms={} error={failure}",
                    started_at.elapsed().as_millis()
                );
                failure
            })?;
        }
        tx.commit()?;
        staged.clear();

        info!(
            "event=save_changes module=context status=ok ops={ops} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Releases the owned connection and drops all staged changes.
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub fn release(&self) {
        let mut state = self.state.borrow_mut();
        if state.conn.is_none() {
            return;
        }
        state.staged.clear();
        state.conn = None;
        info!("event=context_release module=context status=ok");
    }

    /// Whether the session has released its connection.
    pub fn is_released(&self) -> bool {
        self.state.borrow().conn.is_none()
    }

    /// Number of staged, not yet flushed mutations.
    pub fn staged_count(&self) -> usize {
        self.state.borrow().staged.len()
    }
}

fn row_exists<T: Entity>(conn: &Connection, key: &Value) -> StoreResult<bool> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1;",
        T::TABLE,
        T::KEY_COLUMN
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(rusqlite::params![key])?;
    Ok(rows.next()?.is_some())
}
