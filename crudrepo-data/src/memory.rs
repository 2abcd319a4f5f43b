//! In-memory persistence context.
//!
//! [`InMemoryContext`] implements the full unit-of-work contract (managed
//! set, deferred writes, flush modes, generated identifiers) over plain
//! in-process tables. It stands in for a database in tests and exposes
//! [`ContextStats`] so callers can see when the store was touched.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::{ready, Future};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::compiled::{Statement, StatementKind, TypedQuery};
use crate::context::{FlushMode, ManagedKey, PersistenceContext, UnitOfWork};
use crate::entity::{Entity, EntityDescriptor};
use crate::error::DataError;
use crate::query::{Dialect, IdentifierPolicy};

type ErasedRow = Box<dyn Any + Send + Sync>;

/// Counters describing how often the backing tables were used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    pub store_reads: u64,
    pub store_writes: u64,
    pub flushes: u64,
}

#[derive(Default)]
struct Table {
    rows: Vec<(String, ErasedRow)>,
    last_id: i64,
}

enum PendingWrite {
    Update(ManagedKey, ErasedRow),
    Delete(ManagedKey),
}

impl PendingWrite {
    fn key(&self) -> &ManagedKey {
        match self {
            PendingWrite::Update(key, _) | PendingWrite::Delete(key) => key,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<&'static str, Table>,
    managed: HashMap<ManagedKey, ErasedRow>,
    pending: VecDeque<PendingWrite>,
    stats: ContextStats,
}

impl MemoryState {
    fn is_scheduled_for_removal(&self, key: &ManagedKey) -> bool {
        self.pending
            .iter()
            .any(|write| matches!(write, PendingWrite::Delete(k) if k == key))
    }

    fn managed_copy<T: Entity>(&self, key: &ManagedKey) -> Option<T> {
        self.managed
            .get(key)
            .and_then(|row| row.downcast_ref::<T>())
            .cloned()
    }

    fn stored_copy<T: Entity>(&mut self, key: &ManagedKey) -> Option<T> {
        self.stats.store_reads += 1;
        tracing::trace!(key = %key, "in-memory store read");
        self.tables
            .get(key.table)?
            .rows
            .iter()
            .find(|(id, _)| *id == key.id)
            .and_then(|(_, row)| row.downcast_ref::<T>())
            .cloned()
    }

    fn schedule_update<T: Entity>(&mut self, key: ManagedKey, entity: &T) {
        if let Some(PendingWrite::Update(_, row)) = self
            .pending
            .iter_mut()
            .find(|write| matches!(write, PendingWrite::Update(k, _) if *k == key))
        {
            *row = Box::new(entity.clone());
            return;
        }
        self.pending
            .push_back(PendingWrite::Update(key, Box::new(entity.clone())));
    }

    /// Apply queued writes in order. A write that cannot be applied goes
    /// back to the head of the queue.
    fn flush(&mut self) -> Result<(), DataError> {
        let count = self.pending.len();
        while let Some(write) = self.pending.pop_front() {
            if let Err(write) = self.apply(write) {
                let err = DataError::stale(write.key());
                tracing::error!(
                    key = %write.key(),
                    remaining = self.pending.len() + 1,
                    "in-memory flush failed: update matched no row"
                );
                self.pending.push_front(write);
                return Err(err);
            }
        }
        self.stats.flushes += 1;
        tracing::debug!(writes = count, "in-memory flush");
        Ok(())
    }

    /// Apply one write. An update whose row is gone is handed back.
    fn apply(&mut self, write: PendingWrite) -> Result<(), PendingWrite> {
        match write {
            PendingWrite::Update(key, row) => {
                let slot = self
                    .tables
                    .get_mut(key.table)
                    .and_then(|table| table.rows.iter_mut().find(|(id, _)| *id == key.id));
                match slot {
                    Some(slot) => slot.1 = row,
                    None => return Err(PendingWrite::Update(key, row)),
                }
            }
            PendingWrite::Delete(key) => {
                if let Some(table) = self.tables.get_mut(key.table) {
                    table.rows.retain(|(id, _)| *id != key.id);
                }
            }
        }
        self.stats.store_writes += 1;
        Ok(())
    }
}

/// A unit of work backed by in-process tables.
///
/// Tables are created on first insert. Identifiers are generated from a
/// per-table sequence starting at 1, which is why entities stored here need
/// `T::Id: From<i64>`.
pub struct InMemoryContext {
    state: Mutex<MemoryState>,
    flush_mode: FlushMode,
}

impl InMemoryContext {
    pub fn new() -> Self {
        Self::with_flush_mode(FlushMode::default())
    }

    pub fn with_flush_mode(flush_mode: FlushMode) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            flush_mode,
        }
    }

    /// Store usage counters since the context was created.
    pub fn stats(&self) -> ContextStats {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats
    }

    /// Number of writes waiting for the next flush.
    pub fn pending_writes(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }

    /// Rows currently stored in `table`, ignoring pending writes.
    pub fn row_count(&self, table: &str) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tables
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, DataError> {
        self.state
            .lock()
            .map_err(|_| DataError::Other("in-memory context lock poisoned".into()))
    }

    fn merge_now<T>(&self, mut entity: T) -> Result<T, DataError>
    where
        T: Entity,
        T::Id: From<i64>,
    {
        let mut state = self.lock()?;
        let key = entity.id().map(ManagedKey::of::<T>);

        if let Some(key) = key {
            if state.is_scheduled_for_removal(&key) {
                return Err(DataError::Other(format!(
                    "cannot merge {key}: entity is scheduled for removal"
                )));
            }
            let persisted =
                state.managed.contains_key(&key) || state.stored_copy::<T>(&key).is_some();
            if persisted {
                tracing::debug!(key = %key, "merge into managed entity");
                state.managed.insert(key.clone(), Box::new(entity.clone()));
                state.schedule_update(key, &entity);
                if self.flush_mode == FlushMode::Immediate {
                    state.flush()?;
                }
                return Ok(entity);
            }
        }

        let table = state.tables.entry(T::table_name()).or_default();
        table.last_id += 1;
        let id = T::Id::from(table.last_id);
        let key = ManagedKey::of::<T>(&id);
        entity.set_id(id);
        table.rows.push((key.id.clone(), Box::new(entity.clone())));
        state.stats.store_writes += 1;
        tracing::debug!(key = %key, "insert with generated id");
        state.managed.insert(key, Box::new(entity.clone()));
        if self.flush_mode == FlushMode::Immediate {
            state.flush()?;
        }
        Ok(entity)
    }

    fn find_now<T: Entity>(&self, id: &T::Id) -> Result<Option<T>, DataError> {
        let mut state = self.lock()?;
        let key = ManagedKey::of::<T>(id);
        if state.is_scheduled_for_removal(&key) {
            return Ok(None);
        }
        if let Some(entity) = state.managed_copy::<T>(&key) {
            return Ok(Some(entity));
        }
        let found = state.stored_copy::<T>(&key);
        if let Some(entity) = &found {
            state.managed.insert(key, Box::new(entity.clone()));
        }
        Ok(found)
    }

    fn remove_now<T: Entity>(&self, entity: &T) -> Result<(), DataError> {
        let Some(id) = entity.id() else {
            tracing::debug!(entity = T::table_name(), "remove of transient entity ignored");
            return Ok(());
        };
        let mut state = self.lock()?;
        let key = ManagedKey::of::<T>(id);
        state.managed.remove(&key);
        state
            .pending
            .retain(|write| !matches!(write, PendingWrite::Update(k, _) if *k == key));
        if !state.is_scheduled_for_removal(&key) {
            tracing::debug!(key = %key, "schedule removal");
            state.pending.push_back(PendingWrite::Delete(key));
        }
        if self.flush_mode == FlushMode::Immediate {
            state.flush()?;
        }
        Ok(())
    }

    fn query_now<T: Entity>(&self, query: &TypedQuery<T>) -> Result<Vec<T>, DataError> {
        let mut state = self.lock()?;
        if self.flush_mode == FlushMode::Auto {
            state.flush()?;
        }
        state.stats.store_reads += 1;

        let MemoryState {
            tables,
            managed,
            pending,
            ..
        } = &mut *state;
        let Some(table) = tables.get(query.table()) else {
            return Ok(Vec::new());
        };

        let mut results = Vec::with_capacity(table.rows.len());
        for (id, row) in &table.rows {
            let key = ManagedKey {
                table: query.table(),
                id: id.clone(),
            };
            let removed = pending
                .iter()
                .any(|write| matches!(write, PendingWrite::Delete(k) if *k == key));
            if removed {
                continue;
            }
            if let Some(entity) = managed.get(&key).and_then(|m| m.downcast_ref::<T>()) {
                results.push(entity.clone());
                continue;
            }
            if let Some(entity) = row.downcast_ref::<T>() {
                managed.insert(key, Box::new(entity.clone()));
                results.push(entity.clone());
            }
        }
        Ok(results)
    }

    fn update_now<T: Entity>(&self, statement: &Statement<T>) -> Result<u64, DataError> {
        let mut state = self.lock()?;
        if self.flush_mode == FlushMode::Auto {
            state.flush()?;
        }

        let affected = match statement.kind() {
            StatementKind::DeleteAll => match state.tables.get_mut(statement.table()) {
                Some(table) => {
                    let affected = table.rows.len() as u64;
                    table.rows.clear();
                    affected
                }
                None => 0,
            },
        };
        state.stats.store_writes += 1;

        let stale = state
            .managed
            .keys()
            .filter(|key| key.table == statement.table())
            .count();
        if stale > 0 {
            tracing::warn!(
                entity = statement.table(),
                stale,
                "bulk statement bypassed the managed set; managed entities may be stale"
            );
        }
        Ok(affected)
    }
}

impl Default for InMemoryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitOfWork for InMemoryContext {
    fn flush(&self) -> impl Future<Output = Result<(), DataError>> + Send {
        ready(self.lock().and_then(|mut state| state.flush()))
    }

    fn flush_mode(&self) -> FlushMode {
        self.flush_mode
    }
}

impl<T> PersistenceContext<T> for InMemoryContext
where
    T: Entity,
    T::Id: From<i64>,
{
    fn merge(&self, entity: T) -> impl Future<Output = Result<T, DataError>> + Send {
        ready(self.merge_now(entity))
    }

    fn find(&self, id: &T::Id) -> impl Future<Output = Result<Option<T>, DataError>> + Send {
        ready(self.find_now::<T>(id))
    }

    fn remove(&self, entity: &T) -> impl Future<Output = Result<(), DataError>> + Send {
        ready(self.remove_now(entity))
    }

    fn compile_select_all(
        &self,
        descriptor: &EntityDescriptor,
    ) -> Result<TypedQuery<T>, DataError> {
        TypedQuery::select_all(descriptor, Dialect::Generic, IdentifierPolicy::Validate)
    }

    fn compile_delete_all(
        &self,
        descriptor: &EntityDescriptor,
    ) -> Result<Statement<T>, DataError> {
        Statement::delete_all(descriptor, Dialect::Generic, IdentifierPolicy::Validate)
    }

    fn execute_query(
        &self,
        query: &TypedQuery<T>,
    ) -> impl Future<Output = Result<Vec<T>, DataError>> + Send {
        ready(self.query_now(query))
    }

    fn execute_update(
        &self,
        statement: &Statement<T>,
    ) -> impl Future<Output = Result<u64, DataError>> + Send {
        ready(self.update_now(statement))
    }
}
