//! crudrepo: a generic CRUD repository over a unit-of-work persistence context.
//!
//! This facade crate re-exports the crudrepo sub-crates through a single
//! dependency with feature flags. Import everything you need with:
//!
//! ```ignore
//! use crudrepo::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature  | Default | Crate                              |
//! |----------|---------|------------------------------------|
//! | `sqlite` | **yes** | `crudrepo-data-sqlx` (SQLite context) |
//!
//! Without `sqlite`, only the contract, the repository and the in-memory
//! context are available.

pub use crudrepo_data;

#[cfg(feature = "sqlite")]
pub use crudrepo_data_sqlx;

pub use crudrepo_data::{
    CrudRepository, DataError, Entity, EntityDescriptor, FlushMode, InMemoryContext,
    PersistenceContext, UnitOfWork,
};

#[cfg(feature = "sqlite")]
pub use crudrepo_data_sqlx::{connect, PersistenceConfig, SqliteContext, SqliteEntity};

/// Unified prelude: import everything with `use crudrepo::prelude::*`.
pub mod prelude {
    pub use crudrepo_data::prelude::*;
    pub use crudrepo_data::InMemoryContext;

    #[cfg(feature = "sqlite")]
    pub use crudrepo_data_sqlx::prelude::*;
}
