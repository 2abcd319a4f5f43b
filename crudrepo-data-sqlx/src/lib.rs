//! # crudrepo-data-sqlx: SQLite persistence context on SQLx
//!
//! This crate provides a [SQLx](https://github.com/launchbadge/sqlx)-backed
//! implementation of the `crudrepo-data` persistence-context contract. It
//! depends on [`crudrepo-data`] for the traits and the repository, and adds
//! the unit of work, entity binding, configuration and error bridging
//! needed to talk to SQLite.
//!
//! # What's in this crate
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SqliteContext`] | Unit of work over one SQLite transaction |
//! | [`SqliteEntity`] | Row decoding and column binding for an entity |
//! | [`PersistenceConfig`] | Pool and flush settings from YAML, `.env` and environment |
//! | [`connect`] | Build a `SqlitePool` from a [`PersistenceConfig`] |
//! | [`SqlxErrorExt`] | Extension trait to convert `sqlx::Error` → `DataError` (`.into_data_error()`) |
//! | [`SqlxResult<T>`] | Type alias for `Result<T, DataError>` |
//!
//! # Quick start
//!
//! ```ignore
//! use crudrepo_data_sqlx::prelude::*;
//!
//! let config = PersistenceConfig::load("application.yaml")?;
//! let pool = connect(&config).await?;
//!
//! let ctx = SqliteContext::begin(&pool, config.flush_mode).await?;
//! let users = CrudRepository::<UserEntity, _>::new(&ctx)?;
//! let alice = users.save_and_flush(UserEntity::new("alice")).await?;
//! ctx.commit().await?;
//! ```
//!
//! # Error bridging
//!
//! Due to Rust's orphan rules, `From<sqlx::Error> for DataError` can't be
//! implemented here. Use the [`SqlxErrorExt`] trait instead:
//!
//! ```ignore
//! use crudrepo_data_sqlx::SqlxErrorExt;
//!
//! let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
//!     .fetch_one(&pool)
//!     .await
//!     .map_err(|e| e.into_data_error())?;
//! ```

pub mod config;
pub mod context;
pub mod entity;
pub mod error;
mod statements;

pub use config::{connect, ConfigError, PersistenceConfig};
pub use context::SqliteContext;
pub use entity::{SqliteEntity, SqliteId, SqliteQuery};
pub use error::{SqlxErrorExt, SqlxResult};

/// Re-exports of the most commonly used types from both `crudrepo-data` and this crate.
pub mod prelude {
    pub use crate::{
        connect, PersistenceConfig, SqliteContext, SqliteEntity, SqliteQuery, SqlxErrorExt,
    };
    pub use crudrepo_data::prelude::*;
}
