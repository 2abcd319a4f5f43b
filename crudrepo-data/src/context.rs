use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::Deserialize;

use crate::compiled::{Statement, TypedQuery};
use crate::entity::{Entity, EntityDescriptor};
use crate::error::DataError;

/// When pending writes of a unit of work reach the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Only on an explicit `flush()` or when the unit of work commits.
    #[default]
    Commit,
    /// Before every query or bulk statement, and on explicit flushes.
    Auto,
    /// After every merge and remove.
    Immediate,
}

impl FlushMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FlushMode::Commit => "commit",
            FlushMode::Auto => "auto",
            FlushMode::Immediate => "immediate",
        }
    }
}

impl fmt::Display for FlushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlushMode {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "commit" => Ok(FlushMode::Commit),
            "auto" => Ok(FlushMode::Auto),
            "immediate" => Ok(FlushMode::Immediate),
            other => Err(DataError::InvalidArgument(format!(
                "unsupported flush mode `{other}`; expected commit|auto|immediate"
            ))),
        }
    }
}

/// Identity of a managed entity within a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagedKey {
    pub table: &'static str,
    pub id: String,
}

impl ManagedKey {
    pub fn of<T: Entity>(id: &T::Id) -> Self {
        Self {
            table: T::table_name(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for ManagedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.table, self.id)
    }
}

/// The entity-independent half of a persistence context.
pub trait UnitOfWork: Send + Sync {
    /// Propagate every pending write of the unit of work to the store.
    fn flush(&self) -> impl Future<Output = Result<(), DataError>> + Send;

    /// The flush policy this unit of work was opened with.
    fn flush_mode(&self) -> FlushMode;
}

/// Persistence context operations for entity type `T`.
///
/// A context tracks managed entities keyed by `(table, id)`, defers updates
/// and removals until flush, and executes precompiled queries. Errors are
/// returned as produced by the provider.
///
/// Uses RPITIT (return-position `impl Trait` in traits), so no `async-trait`
/// is needed.
pub trait PersistenceContext<T: Entity>: UnitOfWork {
    /// Reconcile `entity` into the managed set and return the managed copy.
    fn merge(&self, entity: T) -> impl Future<Output = Result<T, DataError>> + Send;

    /// Resolve `id` from the managed set, falling back to the store.
    fn find(&self, id: &T::Id) -> impl Future<Output = Result<Option<T>, DataError>> + Send;

    /// Schedule `entity` for removal.
    fn remove(&self, entity: &T) -> impl Future<Output = Result<(), DataError>> + Send;

    fn compile_select_all(
        &self,
        descriptor: &EntityDescriptor,
    ) -> Result<TypedQuery<T>, DataError>;

    fn compile_delete_all(
        &self,
        descriptor: &EntityDescriptor,
    ) -> Result<Statement<T>, DataError>;

    fn execute_query(
        &self,
        query: &TypedQuery<T>,
    ) -> impl Future<Output = Result<Vec<T>, DataError>> + Send;

    /// Run a bulk statement directly against the store and return the
    /// affected row count. The managed set is not reconciled.
    fn execute_update(
        &self,
        statement: &Statement<T>,
    ) -> impl Future<Output = Result<u64, DataError>> + Send;
}
