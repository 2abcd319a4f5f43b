//! # crudrepo-data: generic CRUD repository over a unit of work
//!
//! The crate defines the persistence-context contract and a repository
//! façade on top of it:
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Entity`] | Storage shape of a record: table, id column, columns, id accessors |
//! | [`PersistenceContext`] / [`UnitOfWork`] | Contract a provider implements (merge, find, remove, flush, queries) |
//! | [`CrudRepository`] | CRUD façade delegating every call to a borrowed context |
//! | [`TypedQuery`] / [`Statement`] | Precompiled select-all and delete-all queries |
//! | [`InMemoryContext`] | Provider over in-process tables, for tests |
//! | [`DataError`] | Error type shared by the repository and providers |
//!
//! SQL-backed providers live in separate crates (e.g. `crudrepo-data-sqlx`).

pub mod compiled;
pub mod context;
pub mod crud;
pub mod entity;
pub mod error;
pub mod memory;
pub mod query;

pub use compiled::{Statement, StatementKind, TypedQuery};
pub use context::{FlushMode, ManagedKey, PersistenceContext, UnitOfWork};
pub use crud::CrudRepository;
pub use entity::{Entity, EntityDescriptor};
pub use error::DataError;
pub use memory::{ContextStats, InMemoryContext};
pub use query::{Dialect, IdentifierPolicy, QueryBuilder, QueryError};

pub mod prelude {
    //! Re-exports of the most commonly used data types.
    pub use crate::{
        CrudRepository, DataError, Entity, FlushMode, PersistenceContext, UnitOfWork,
    };
}
