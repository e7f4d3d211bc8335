//! Per-entity-type repository surface.
//!
//! # Responsibility
//! - Provide uniform CRUD and query entry points for one entity type.
//! - Stage mutations against the shared context; nothing persists until
//!   the owning unit of work saves changes.
//!
//! # Invariants
//! - A repository never outlives its context: once the context is
//!   released, every operation fails with `StoreError::Disposed`.
//! - Read paths return `Ok(None)` / empty sets for absence, never errors.

use crate::context::{StoreContext, StoreResult};
use crate::entity::{find_relation, Entity};
use crate::query::{Filter, Query};
use rusqlite::types::Value;
use std::marker::PhantomData;
use std::rc::Rc;

/// Data-access surface for one entity type over a shared store context.
///
/// Obtained from [`UnitOfWork::repository`](crate::uow::UnitOfWork::repository);
/// one instance exists per entity type per unit of work.
pub struct Repository<T: Entity> {
    session: Rc<StoreContext>,
    _marker: PhantomData<T>,
}

impl<T: Entity> Repository<T> {
    pub(crate) fn new(session: Rc<StoreContext>) -> Self {
        Self {
            session,
            _marker: PhantomData,
        }
    }

    /// Looks up one entity by primary key.
    ///
    /// Consults staged inserts first, so an entity inserted through this
    /// unit of work is visible before commit. Absence is `Ok(None)`.
    pub fn get_by_id(&self, id: impl Into<Value>) -> StoreResult<Option<T>> {
        let key = id.into();
        if let Some(staged) = self.session.find_staged_insert::<T>(&key)? {
            return Ok(Some(staged));
        }
        Query::new(self.session.clone(), Some(Filter::Eq(T::KEY_COLUMN, key)))
            .limit(1)
            .fetch_one()
    }

    /// Filters with an arbitrary Rust predicate.
    ///
    /// Materializes every row of the backing table, then filters lazily
    /// in memory. Use [`Repository::query`] when the predicate can be
    /// expressed as a [`Filter`]; this path exists for predicate logic the
    /// engine cannot translate, and the caller accepts the full
    /// materialization cost.
    pub fn search<P>(&self, predicate: P) -> StoreResult<impl Iterator<Item = T>>
    where
        P: FnMut(&T) -> bool,
    {
        let entities = self.get_all().fetch()?;
        Ok(entities.into_iter().filter(predicate))
    }

    /// Returns a deferred query filtered by `filter`.
    ///
    /// Nothing executes until `fetch`; the predicate is pushed down to
    /// the engine, and the caller may compose ordering, paging and
    /// includes first.
    pub fn query(&self, filter: Filter) -> Query<T> {
        Query::new(self.session.clone(), Some(filter))
    }

    /// Returns a deferred, unfiltered query over the whole table.
    pub fn get_all(&self) -> Query<T> {
        Query::new(self.session.clone(), None)
    }

    /// Executes caller-supplied SQL text and maps rows onto `T`.
    ///
    /// Direct passthrough: the text is not inspected, rewritten or
    /// sanitized, and the caller is responsible for its correctness and
    /// injection safety. The selected columns must cover `T::COLUMNS`.
    pub fn raw_query(&self, sql: &str) -> StoreResult<Vec<T>> {
        self.session.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([])?;
            let mut entities = Vec::new();
            while let Some(row) = rows.next()? {
                entities.push(T::from_row(row)?);
            }
            Ok(entities)
        })
    }

    /// Stages the entity for insertion; persisted on the next
    /// `save_changes`.
    pub fn insert(&self, entity: T) -> StoreResult<()> {
        self.session.stage_insert(entity)
    }

    /// Stages the entity for removal by key; persisted on the next
    /// `save_changes`.
    pub fn delete(&self, entity: &T) -> StoreResult<()> {
        self.session.stage_delete::<T>(entity.key_value())
    }

    /// Marks the entity's current field values as modified.
    ///
    /// The entity must already be tracked by this context (staged for
    /// insert) or attachable (present in storage); anything else is an
    /// [`Untracked`](crate::context::StoreError::Untracked) error rather
    /// than a silent attach.
    pub fn update(&self, entity: &T) -> StoreResult<()> {
        self.session.record_update(entity)
    }

    /// Returns a deferred query with eager loading for each named
    /// relation.
    ///
    /// Includes fold cumulatively into one statement: however many
    /// relations are requested, the store is hit exactly once, and the
    /// include order never changes the primary result set. `None` filter
    /// and an empty include list degrade to a plain unfiltered query.
    pub fn include_multiple(
        &self,
        filter: Option<Filter>,
        includes: &[&'static str],
    ) -> StoreResult<Query<T>> {
        for name in includes {
            if find_relation::<T>(name).is_none() {
                return Err(crate::context::StoreError::UnknownRelation {
                    table: T::TABLE,
                    relation: (*name).to_string(),
                });
            }
        }
        let mut query = Query::new(self.session.clone(), filter);
        for name in includes {
            query = query.include(*name);
        }
        Ok(query)
    }
}
