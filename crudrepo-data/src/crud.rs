use std::borrow::Borrow;

use crate::compiled::{Statement, TypedQuery};
use crate::context::PersistenceContext;
use crate::entity::Entity;
use crate::error::DataError;

/// Generic CRUD repository over a shared persistence context.
///
/// Every operation forwards to the context. The only state kept here is the
/// pair of queries compiled from `T`'s descriptor at construction. The
/// context is borrowed: the repository never opens, flushes on its own,
/// commits, or closes it.
///
/// # Example
///
/// ```ignore
/// let ctx = SqliteContext::begin(&pool, FlushMode::Commit).await?;
/// let repo = CrudRepository::<UserEntity, _>::new(&ctx)?;
/// let saved = repo.save_and_flush(UserEntity::new("alice")).await?;
/// let users = repo.find_all().await?;
/// ```
pub struct CrudRepository<'ctx, T, C>
where
    T: Entity,
    C: PersistenceContext<T>,
{
    ctx: &'ctx C,
    find_all_query: TypedQuery<T>,
    delete_all_statement: Statement<T>,
}

impl<'ctx, T, C> CrudRepository<'ctx, T, C>
where
    T: Entity,
    C: PersistenceContext<T>,
{
    /// Build a repository for `T` and compile its select-all and delete-all
    /// queries through `ctx`.
    pub fn new(ctx: &'ctx C) -> Result<Self, DataError> {
        let descriptor = T::descriptor();
        let find_all_query = ctx.compile_select_all(&descriptor)?;
        let delete_all_statement = ctx.compile_delete_all(&descriptor)?;
        Ok(Self {
            ctx,
            find_all_query,
            delete_all_statement,
        })
    }

    /// Get the underlying persistence context.
    pub fn context(&self) -> &'ctx C {
        self.ctx
    }

    /// Saves a given entity.
    ///
    /// Use the returned value for further operations: it is the managed
    /// copy and may differ from the input (e.g. a generated id). Updates
    /// reach the store on the next flush, as decided by the context's
    /// flush mode.
    pub async fn save(&self, entity: T) -> Result<T, DataError> {
        tracing::debug!(entity = T::table_name(), id = ?entity.id(), "save");
        self.ctx.merge(entity).await
    }

    /// Saves an entity and flushes the whole unit of work before returning.
    pub async fn save_and_flush(&self, entity: T) -> Result<T, DataError> {
        tracing::debug!(entity = T::table_name(), id = ?entity.id(), "save_and_flush");
        let saved = self.ctx.merge(entity).await?;
        self.ctx.flush().await?;
        Ok(saved)
    }

    /// Flush pending changes to the store (not only those of `T`).
    pub async fn flush(&self) -> Result<(), DataError> {
        self.ctx.flush().await
    }

    /// Saves all given entities, one merge per element.
    ///
    /// The result keeps the input order. Not atomic: an error stops the
    /// iteration and leaves earlier elements merged.
    pub async fn save_all<I>(&self, entities: I) -> Result<Vec<T>, DataError>
    where
        I: IntoIterator<Item = T>,
    {
        let entities = entities.into_iter();
        let mut saved = Vec::with_capacity(entities.size_hint().0);
        for entity in entities {
            saved.push(self.save(entity).await?);
        }
        tracing::debug!(entity = T::table_name(), count = saved.len(), "save_all");
        Ok(saved)
    }

    /// Retrieves an entity by its id, or `None` if there is none.
    pub async fn find_one(&self, id: &T::Id) -> Result<Option<T>, DataError> {
        tracing::debug!(entity = T::table_name(), %id, "find_one");
        self.ctx.find(id).await
    }

    /// Retrieves an entity by its id and requires it to be found.
    ///
    /// # Errors
    /// `DataError::NotFound` carrying the id when no entity matches.
    pub async fn require_one(&self, id: &T::Id) -> Result<T, DataError> {
        self.find_one(id)
            .await?
            .ok_or_else(|| DataError::not_found(id))
    }

    /// Returns whether an entity with the given id exists.
    pub async fn exists(&self, id: &T::Id) -> Result<bool, DataError> {
        Ok(self.find_one(id).await?.is_some())
    }

    /// Returns all instances of `T` in store order.
    pub async fn find_all(&self) -> Result<Vec<T>, DataError> {
        tracing::debug!(entity = T::table_name(), "find_all");
        self.ctx.execute_query(&self.find_all_query).await
    }

    /// Deletes a given entity. Removal reaches the store on flush.
    pub async fn delete(&self, entity: &T) -> Result<(), DataError> {
        tracing::debug!(entity = T::table_name(), id = ?entity.id(), "delete");
        self.ctx.remove(entity).await
    }

    /// Deletes the given entities in order; stops at the first error.
    pub async fn delete_all<I>(&self, entities: I) -> Result<(), DataError>
    where
        I: IntoIterator,
        I::Item: Borrow<T>,
    {
        for entity in entities {
            self.delete(Borrow::<T>::borrow(&entity)).await?;
        }
        Ok(())
    }

    /// Deletes every row of `T`'s table with one bulk statement.
    ///
    /// Bypasses the managed set: entities fetched earlier in the same unit
    /// of work stay managed and may be stale afterwards.
    pub async fn delete_all_of_type(&self) -> Result<u64, DataError> {
        let affected = self
            .ctx
            .execute_update(&self.delete_all_statement)
            .await?;
        tracing::debug!(entity = T::table_name(), affected, "delete_all_of_type");
        Ok(affected)
    }
}
