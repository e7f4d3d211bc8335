//! Repository / unit-of-work data access over SQLite.
//!
//! Callers describe their entity types through the [`Entity`] contract,
//! open a connection via [`db`], wrap it into a [`UnitOfWork`], and reach
//! per-type [`Repository`] handles through it. Mutations stage against the
//! shared context and persist together on [`UnitOfWork::save_changes`].

pub mod context;
pub mod db;
pub mod entity;
pub mod logging;
pub mod query;
pub mod repo;
pub mod uow;

pub use context::{StoreContext, StoreError, StoreResult};
pub use db::{apply_schema, open_db, open_db_in_memory, DbError, DbResult};
pub use entity::{Entity, RelatedRow, RelationDef, RelationKind};
pub use logging::{default_log_level, init_logging, logging_status};
pub use query::{Filter, Query, SortOrder};
pub use repo::Repository;
pub use uow::UnitOfWork;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
