//! Entity metadata contract consumed by repositories and the store context.
//!
//! # Responsibility
//! - Describe how one entity type maps onto its table: columns, key,
//!   row parsing, value encoding, declared relations.
//! - Keep the core generic: concrete entity definitions live with callers.
//!
//! # Invariants
//! - `COLUMNS` and `to_values` agree on order and arity.
//! - `KEY_COLUMN` appears in `COLUMNS` and `key_value` returns its value.

use crate::context::StoreResult;
use rusqlite::types::Value;
use rusqlite::Row;

/// Mapping contract between one entity type and its table.
///
/// Implemented by caller-defined entity structs. The core never inspects
/// entity fields directly; everything flows through this metadata surface.
pub trait Entity: Clone + 'static {
    /// Table name backing this entity type.
    const TABLE: &'static str;

    /// Column names in canonical order, key column included.
    const COLUMNS: &'static [&'static str];

    /// Primary key column name.
    const KEY_COLUMN: &'static str;

    /// Current primary key value, encoded as a SQLite value.
    ///
    /// Kept as [`Value`] rather than a fixed numeric type so keys of any
    /// shape SQLite accepts (integer, text, blob) work uniformly.
    fn key_value(&self) -> Value;

    /// Column values in `COLUMNS` order.
    fn to_values(&self) -> Vec<Value>;

    /// Parses one entity from a row selected with plain `COLUMNS` names.
    ///
    /// Implementations should reject invalid persisted state instead of
    /// masking it.
    fn from_row(row: &Row<'_>) -> StoreResult<Self>;

    /// Relations this entity type can eagerly load. Empty by default.
    fn relations() -> &'static [RelationDef] {
        &[]
    }

    /// Receives eagerly loaded rows for one declared relation.
    ///
    /// Called once per requested relation after a fetch with includes,
    /// with `rows` possibly empty. The default ignores related data; entity
    /// types with navigation fields override this to populate them.
    fn attach_related(&mut self, _relation: &'static str, _rows: Vec<RelatedRow>) {}
}

/// Direction of a declared relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// This entity holds a foreign key to one target row.
    BelongsTo,
    /// Target rows hold a foreign key back to this entity.
    HasMany,
}

/// One eagerly loadable relation declared by an entity type.
#[derive(Debug, Clone, Copy)]
pub struct RelationDef {
    /// Relation name used in include lists and `attach_related`.
    pub name: &'static str,
    pub kind: RelationKind,
    /// Table holding the related rows.
    pub target_table: &'static str,
    /// Related columns in the order delivered by [`RelatedRow`].
    pub target_columns: &'static [&'static str],
    /// Join column on this entity's table.
    pub local_column: &'static str,
    /// Join column on the target table.
    pub target_join_column: &'static str,
}

/// One related row delivered to `attach_related`.
///
/// Values follow the owning relation's `target_columns` order.
#[derive(Debug, Clone)]
pub struct RelatedRow {
    pub values: Vec<Value>,
}

/// Looks up a declared relation by name.
pub(crate) fn find_relation<T: Entity>(name: &str) -> Option<&'static RelationDef> {
    T::relations().iter().find(|relation| relation.name == name)
}

/// Renders a SQLite value for diagnostics and error messages.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}
