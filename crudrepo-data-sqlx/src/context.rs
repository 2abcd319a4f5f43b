//! Unit of work over a single SQLite transaction.
//!
//! [`SqliteContext`] owns one `sqlx::Transaction` for its whole lifetime.
//! Inserts run immediately so generated ids are known after `merge`; updates
//! and deletes are queued and applied in order on flush. Nothing is visible
//! to other connections until [`SqliteContext::commit`].

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;

use crudrepo_data::{
    DataError, Dialect, Entity, EntityDescriptor, FlushMode, IdentifierPolicy, ManagedKey,
    PersistenceContext, Statement, StatementKind, TypedQuery, UnitOfWork,
};
use futures_util::future::BoxFuture;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool};
use sqlx::{Row, Transaction};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::entity::{SqliteEntity, SqliteId};
use crate::error::SqlxErrorExt;
use crate::statements::EntityStatements;

type ErasedRow = Box<dyn Any + Send + Sync>;

/// A queued write, erased over the entity type so one queue serves every table.
trait ErasedWrite: Send + Sync {
    fn execute<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
    ) -> BoxFuture<'a, Result<u64, sqlx::Error>>;
}

struct UpdateRow<T> {
    statements: Arc<EntityStatements>,
    entity: T,
}

impl<T> ErasedWrite for UpdateRow<T>
where
    T: SqliteEntity,
    T::Id: SqliteId,
{
    fn execute<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
    ) -> BoxFuture<'a, Result<u64, sqlx::Error>> {
        Box::pin(async move {
            let (Some(sql), Some(id)) = (self.statements.update.as_deref(), self.entity.id())
            else {
                return Ok(0);
            };
            self.entity
                .bind_columns(sqlx::query(sql))
                .bind(id.clone())
                .execute(conn)
                .await
                .map(|done| done.rows_affected())
        })
    }
}

struct DeleteRow<T: Entity> {
    statements: Arc<EntityStatements>,
    id: T::Id,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ErasedWrite for DeleteRow<T>
where
    T: SqliteEntity,
    T::Id: SqliteId,
{
    fn execute<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
    ) -> BoxFuture<'a, Result<u64, sqlx::Error>> {
        Box::pin(async move {
            sqlx::query(&self.statements.delete_by_id)
                .bind(self.id.clone())
                .execute(conn)
                .await
                .map(|done| done.rows_affected())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Update,
    Delete,
}

struct PendingWrite {
    key: ManagedKey,
    kind: WriteKind,
    op: Box<dyn ErasedWrite>,
}

struct Inner {
    tx: Transaction<'static, Sqlite>,
    managed: HashMap<ManagedKey, ErasedRow>,
    pending: VecDeque<PendingWrite>,
    statements: HashMap<&'static str, Arc<EntityStatements>>,
}

impl Inner {
    fn statements_for<T: Entity>(&mut self) -> Result<Arc<EntityStatements>, DataError> {
        if let Some(statements) = self.statements.get(T::table_name()) {
            return Ok(Arc::clone(statements));
        }
        let statements = Arc::new(EntityStatements::compile(&T::descriptor())?);
        tracing::debug!(entity = T::table_name(), "compiled entity statements");
        self.statements.insert(T::table_name(), Arc::clone(&statements));
        Ok(statements)
    }

    fn is_scheduled_for_removal(&self, key: &ManagedKey) -> bool {
        self.pending
            .iter()
            .any(|write| write.kind == WriteKind::Delete && write.key == *key)
    }

    fn managed_copy<T: Entity>(&self, key: &ManagedKey) -> Option<T> {
        self.managed
            .get(key)
            .and_then(|row| row.downcast_ref::<T>())
            .cloned()
    }

    /// Queue `op` as the update for `key`, replacing an earlier queued update.
    fn schedule_update(&mut self, key: ManagedKey, op: Box<dyn ErasedWrite>) {
        if let Some(write) = self
            .pending
            .iter_mut()
            .find(|write| write.kind == WriteKind::Update && write.key == key)
        {
            write.op = op;
            return;
        }
        self.pending.push_back(PendingWrite {
            key,
            kind: WriteKind::Update,
            op,
        });
    }

    /// Apply queued writes in order. A failing write stays at the head of the
    /// queue together with everything behind it.
    ///
    /// An update that matches no row fails with a stale-entity error.
    async fn flush(&mut self) -> Result<(), DataError> {
        let Inner { tx, pending, .. } = self;
        let total = pending.len();
        while let Some(write) = pending.front() {
            match write.op.execute(&mut **tx).await {
                Ok(0) if write.kind == WriteKind::Update => {
                    tracing::error!(
                        key = %write.key,
                        remaining = pending.len(),
                        "flush failed: update matched no row"
                    );
                    return Err(DataError::stale(&write.key));
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(
                        key = %write.key,
                        remaining = pending.len(),
                        error = %err,
                        "flush failed"
                    );
                    return Err(err.into_data_error());
                }
            }
            pending.pop_front();
        }
        tracing::debug!(writes = total, "sqlite flush");
        Ok(())
    }

    fn warn_stale(&self, table: &'static str) {
        let stale = self.managed.keys().filter(|key| key.table == table).count();
        if stale > 0 {
            tracing::warn!(
                entity = table,
                stale,
                "bulk statement bypassed the managed set; managed entities may be stale"
            );
        }
    }
}

async fn fetch_by_id<T>(
    conn: &mut SqliteConnection,
    statements: &EntityStatements,
    id: &T::Id,
) -> Result<Option<T>, DataError>
where
    T: SqliteEntity,
    T::Id: SqliteId,
{
    sqlx::query_as::<_, T>(&statements.select_by_id)
        .bind(id.clone())
        .fetch_optional(conn)
        .await
        .map_err(SqlxErrorExt::into_data_error)
}

async fn insert_row<T>(
    conn: &mut SqliteConnection,
    statements: &EntityStatements,
    entity: &T,
) -> Result<T::Id, DataError>
where
    T: SqliteEntity,
    T::Id: SqliteId,
{
    let row = entity
        .bind_columns(sqlx::query(&statements.insert))
        .fetch_one(conn)
        .await
        .map_err(SqlxErrorExt::into_data_error)?;
    row.try_get::<T::Id, _>(0)
        .map_err(SqlxErrorExt::into_data_error)
}

/// A persistence context bound to one SQLite transaction.
///
/// Writes through the context are only visible to other connections after
/// [`commit`](SqliteContext::commit). Dropping the context without
/// committing rolls the transaction back.
///
/// ```ignore
/// let pool = connect(&config).await?;
/// let ctx = SqliteContext::begin(&pool, config.flush_mode).await?;
/// let repo = CrudRepository::<UserEntity, _>::new(&ctx)?;
/// repo.save_and_flush(UserEntity::new("alice")).await?;
/// ctx.commit().await?;
/// ```
pub struct SqliteContext {
    inner: Mutex<Inner>,
    flush_mode: FlushMode,
}

impl SqliteContext {
    /// Begin a transaction on `pool` and wrap it in a new context.
    pub async fn begin(pool: &SqlitePool, flush_mode: FlushMode) -> Result<Self, DataError> {
        let tx = pool.begin().await.map_err(SqlxErrorExt::into_data_error)?;
        tracing::debug!(flush_mode = %flush_mode, "sqlite context started");
        Ok(Self {
            inner: Mutex::new(Inner {
                tx,
                managed: HashMap::new(),
                pending: VecDeque::new(),
                statements: HashMap::new(),
            }),
            flush_mode,
        })
    }

    /// Flush pending writes, then commit the transaction.
    pub async fn commit(self) -> Result<(), DataError> {
        let mut inner = self.inner.into_inner();
        inner.flush().await?;
        inner
            .tx
            .commit()
            .await
            .map_err(SqlxErrorExt::into_data_error)?;
        tracing::debug!("sqlite context committed");
        Ok(())
    }

    /// Discard pending writes and roll the transaction back.
    pub async fn rollback(self) -> Result<(), DataError> {
        let inner = self.inner.into_inner();
        let discarded = inner.pending.len();
        inner
            .tx
            .rollback()
            .await
            .map_err(SqlxErrorExt::into_data_error)?;
        tracing::debug!(discarded, "sqlite context rolled back");
        Ok(())
    }

    /// The connection of the underlying transaction.
    ///
    /// Statements run here bypass the managed set and the write queue.
    /// The guard holds the context's lock: drop it before awaiting any other
    /// operation on this context, or the task deadlocks.
    pub async fn connection(&self) -> MappedMutexGuard<'_, SqliteConnection> {
        MutexGuard::map(self.inner.lock().await, |inner| &mut *inner.tx)
    }

    /// Number of writes waiting for the next flush.
    pub async fn pending_writes(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Whether the entity identified by `key` is in the managed set.
    pub async fn is_managed(&self, key: &ManagedKey) -> bool {
        self.inner.lock().await.managed.contains_key(key)
    }

    async fn auto_flush(&self, inner: &mut Inner) -> Result<(), DataError> {
        if self.flush_mode == FlushMode::Auto {
            inner.flush().await?;
        }
        Ok(())
    }

    async fn immediate_flush(&self, inner: &mut Inner) -> Result<(), DataError> {
        if self.flush_mode == FlushMode::Immediate {
            inner.flush().await?;
        }
        Ok(())
    }
}

impl UnitOfWork for SqliteContext {
    async fn flush(&self) -> Result<(), DataError> {
        self.inner.lock().await.flush().await
    }

    fn flush_mode(&self) -> FlushMode {
        self.flush_mode
    }
}

impl<T> PersistenceContext<T> for SqliteContext
where
    T: SqliteEntity,
    T::Id: SqliteId,
{
    async fn merge(&self, mut entity: T) -> Result<T, DataError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let statements = inner.statements_for::<T>()?;

        if let Some(id) = entity.id().cloned() {
            let key = ManagedKey::of::<T>(&id);
            if inner.is_scheduled_for_removal(&key) {
                return Err(DataError::Other(format!(
                    "cannot merge {key}: entity is scheduled for removal"
                )));
            }
            let persisted = inner.managed.contains_key(&key)
                || fetch_by_id::<T>(&mut inner.tx, &statements, &id)
                    .await?
                    .is_some();
            if persisted {
                tracing::debug!(key = %key, "merge into managed entity");
                inner.managed.insert(key.clone(), Box::new(entity.clone()));
                if statements.update.is_some() {
                    inner.schedule_update(
                        key,
                        Box::new(UpdateRow {
                            statements,
                            entity: entity.clone(),
                        }),
                    );
                }
                self.immediate_flush(inner).await?;
                return Ok(entity);
            }
        }

        let id = insert_row(&mut inner.tx, &statements, &entity).await?;
        let key = ManagedKey::of::<T>(&id);
        entity.set_id(id);
        tracing::debug!(key = %key, "insert with generated id");
        inner.managed.insert(key, Box::new(entity.clone()));
        self.immediate_flush(inner).await?;
        Ok(entity)
    }

    async fn find(&self, id: &T::Id) -> Result<Option<T>, DataError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let key = ManagedKey::of::<T>(id);
        if inner.is_scheduled_for_removal(&key) {
            return Ok(None);
        }
        if let Some(entity) = inner.managed_copy::<T>(&key) {
            return Ok(Some(entity));
        }

        let statements = inner.statements_for::<T>()?;
        tracing::trace!(key = %key, "sqlite read by id");
        let found = fetch_by_id::<T>(&mut inner.tx, &statements, id).await?;
        if let Some(entity) = &found {
            inner.managed.insert(key, Box::new(entity.clone()));
        }
        Ok(found)
    }

    async fn remove(&self, entity: &T) -> Result<(), DataError> {
        let Some(id) = entity.id() else {
            tracing::debug!(entity = T::table_name(), "remove of transient entity ignored");
            return Ok(());
        };
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let statements = inner.statements_for::<T>()?;
        let key = ManagedKey::of::<T>(id);

        inner.managed.remove(&key);
        inner
            .pending
            .retain(|write| !(write.kind == WriteKind::Update && write.key == key));
        if !inner.is_scheduled_for_removal(&key) {
            tracing::debug!(key = %key, "schedule removal");
            inner.pending.push_back(PendingWrite {
                key,
                kind: WriteKind::Delete,
                op: Box::new(DeleteRow::<T> {
                    statements,
                    id: id.clone(),
                    _marker: PhantomData,
                }),
            });
        }
        self.immediate_flush(inner).await
    }

    fn compile_select_all(
        &self,
        descriptor: &EntityDescriptor,
    ) -> Result<TypedQuery<T>, DataError> {
        TypedQuery::select_all(descriptor, Dialect::Sqlite, IdentifierPolicy::Quote)
    }

    fn compile_delete_all(
        &self,
        descriptor: &EntityDescriptor,
    ) -> Result<Statement<T>, DataError> {
        Statement::delete_all(descriptor, Dialect::Sqlite, IdentifierPolicy::Quote)
    }

    async fn execute_query(&self, query: &TypedQuery<T>) -> Result<Vec<T>, DataError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        self.auto_flush(inner).await?;

        let rows = sqlx::query_as::<_, T>(query.sql())
            .fetch_all(&mut *inner.tx)
            .await
            .map_err(SqlxErrorExt::into_data_error)?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(id) = row.id() else {
                results.push(row);
                continue;
            };
            let key = ManagedKey::of::<T>(id);
            if inner.is_scheduled_for_removal(&key) {
                continue;
            }
            if let Some(managed) = inner.managed_copy::<T>(&key) {
                results.push(managed);
                continue;
            }
            inner.managed.insert(key, Box::new(row.clone()));
            results.push(row);
        }
        Ok(results)
    }

    async fn execute_update(&self, statement: &Statement<T>) -> Result<u64, DataError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        self.auto_flush(inner).await?;

        let affected = match statement.kind() {
            StatementKind::DeleteAll => sqlx::query(statement.sql())
                .execute(&mut *inner.tx)
                .await
                .map_err(SqlxErrorExt::into_data_error)?
                .rows_affected(),
        };
        tracing::debug!(entity = statement.table(), affected, "bulk statement executed");
        inner.warn_stale(statement.table());
        Ok(affected)
    }
}
