//! Unit of work: repository cache, commit point and context lifetime.
//!
//! # Responsibility
//! - Own the shared store context for its whole lifetime.
//! - Hand out exactly one repository per entity type, cached by type.
//! - Expose one all-or-nothing commit point over every staged change.
//!
//! # Invariants
//! - Repeated `repository::<T>()` calls return the identical cached
//!   handle, so all callers share one staged-change view per type.
//! - Once disposed, `repository` and `save_changes` fail with
//!   `StoreError::Disposed`; disposing again is a safe no-op.
//! - While the dispose lock is set, `dispose` has no effect and the
//!   instance stays fully usable.

use crate::context::{StoreContext, StoreError, StoreResult};
use crate::entity::Entity;
use crate::repo::Repository;
use log::{debug, info};
use rusqlite::Connection;
use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// Coordinator owning one store context and a type-keyed repository cache.
///
/// Single-threaded by design: one unit of work serves one logical caller.
/// Independent instances, each with their own connection, do not share
/// state and may run side by side.
pub struct UnitOfWork {
    session: Rc<StoreContext>,
    /// Type-erased cache: `TypeId` of the entity type maps to the
    /// `Rc<Repository<T>>` constructed on first request.
    repositories: RefCell<HashMap<TypeId, Box<dyn Any>>>,
    dispose_locked: Cell<bool>,
    disposed: Cell<bool>,
}

impl UnitOfWork {
    /// Creates a unit of work owning the given connection.
    ///
    /// The connection is wrapped into a fresh [`StoreContext`] and stays
    /// owned by this instance until disposal.
    pub fn new(conn: Connection) -> Self {
        info!("event=uow_create module=uow status=ok");
        Self {
            session: Rc::new(StoreContext::new(conn)),
            repositories: RefCell::new(HashMap::new()),
            dispose_locked: Cell::new(false),
            disposed: Cell::new(false),
        }
    }

    /// Returns the repository for entity type `T`.
    ///
    /// The first call constructs and caches it; later calls return the
    /// identical handle, so staged state is shared between them.
    pub fn repository<T: Entity>(&self) -> StoreResult<Rc<Repository<T>>> {
        if self.disposed.get() {
            return Err(StoreError::Disposed);
        }

        let mut repositories = self.repositories.borrow_mut();
        let type_id = TypeId::of::<T>();

        if let Some(cached) = repositories.get(&type_id) {
            if let Some(repository) = cached.downcast_ref::<Rc<Repository<T>>>() {
                debug!(
                    "event=repo_cache module=uow status=hit table={}",
                    T::TABLE
                );
                return Ok(repository.clone());
            }
        }

        debug!(
            "event=repo_cache module=uow status=miss table={}",
            T::TABLE
        );
        let repository = Rc::new(Repository::<T>::new(self.session.clone()));
        repositories.insert(type_id, Box::new(repository.clone()));
        Ok(repository)
    }

    /// Flushes every staged mutation across all repositories in one
    /// transaction.
    ///
    /// All-or-nothing: on failure nothing is persisted, the engine's
    /// diagnostic is passed through, and the staged changes stay intact.
    pub fn save_changes(&self) -> StoreResult<()> {
        if self.disposed.get() {
            return Err(StoreError::Disposed);
        }
        self.session.save_changes()
    }

    /// Releases the owned context unless the dispose lock is set.
    ///
    /// When locked this is a no-op and the instance stays usable: the
    /// lock is the caller's safety valve while longer-lived consumers
    /// still hold repository handles. Disposing an already disposed
    /// instance is a safe no-op.
    pub fn dispose(&self) {
        if self.dispose_locked.get() {
            debug!("event=dispose module=uow status=skipped reason=dispose_lock");
            return;
        }
        if self.disposed.get() {
            return;
        }
        self.disposed.set(true);
        self.repositories.borrow_mut().clear();
        self.session.release();
        info!("event=dispose module=uow status=ok");
    }

    /// Sets or clears the dispose lock.
    ///
    /// A single boolean gate, not a reference count: the caller that
    /// shares this unit of work manages it.
    pub fn set_dispose_lock(&self, locked: bool) {
        self.dispose_locked.set(locked);
    }

    pub fn is_dispose_locked(&self) -> bool {
        self.dispose_locked.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        // Honors the dispose lock; a locked instance releases its
        // connection only when the last context handle drops.
        self.dispose();
    }
}
