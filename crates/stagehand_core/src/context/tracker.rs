//! Staged mutation log entries.
//!
//! # Responsibility
//! - Represent pending inserts, updates and deletes per entity type.
//! - Translate each staged entry into one SQL statement at flush time.
//!
//! # Invariants
//! - Entries are flushed in staging order inside a single transaction.
//! - An update or delete that touches no row is a semantic `NotFound`,
//!   not a silent success.

use crate::context::{StoreError, StoreResult};
use crate::entity::{value_text, Entity};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Transaction};
use std::any::Any;

/// Type-erased staged mutation, applied against the flush transaction.
pub(crate) trait StagedOp {
    fn apply(&self, tx: &Transaction<'_>) -> StoreResult<()>;
    fn table(&self) -> &'static str;
    fn kind(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Pending mutation for one entity type.
pub(crate) enum Staged<T: Entity> {
    Insert(T),
    Update(T),
    Delete(Value),
}

impl<T: Entity> Staged<T> {
    fn insert_sql() -> String {
        let placeholders = vec!["?"; T::COLUMNS.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({});",
            T::TABLE,
            T::COLUMNS.join(", "),
            placeholders
        )
    }

    fn update_sql() -> String {
        let assignments = T::COLUMNS
            .iter()
            .filter(|column| **column != T::KEY_COLUMN)
            .map(|column| format!("{column} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "UPDATE {} SET {} WHERE {} = ?;",
            T::TABLE,
            assignments,
            T::KEY_COLUMN
        )
    }

    fn delete_sql() -> String {
        format!("DELETE FROM {} WHERE {} = ?;", T::TABLE, T::KEY_COLUMN)
    }
}

impl<T: Entity> StagedOp for Staged<T> {
    fn apply(&self, tx: &Transaction<'_>) -> StoreResult<()> {
        match self {
            Self::Insert(entity) => {
                tx.execute(&Self::insert_sql(), params_from_iter(entity.to_values()))?;
                Ok(())
            }
            Self::Update(entity) => {
                let mut values: Vec<Value> = Vec::with_capacity(T::COLUMNS.len());
                for (column, value) in T::COLUMNS.iter().zip(entity.to_values()) {
                    if *column != T::KEY_COLUMN {
                        values.push(value);
                    }
                }
                let key = entity.key_value();
                values.push(key.clone());

                let changed = tx.execute(&Self::update_sql(), params_from_iter(values))?;
                if changed == 0 {
                    return Err(StoreError::NotFound {
                        table: T::TABLE,
                        key: value_text(&key),
                    });
                }
                Ok(())
            }
            Self::Delete(key) => {
                let changed = tx.execute(&Self::delete_sql(), params![key])?;
                if changed == 0 {
                    return Err(StoreError::NotFound {
                        table: T::TABLE,
                        key: value_text(key),
                    });
                }
                Ok(())
            }
        }
    }

    fn table(&self) -> &'static str {
        T::TABLE
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
