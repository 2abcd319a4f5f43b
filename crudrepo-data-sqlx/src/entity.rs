use crudrepo_data::Entity;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Decode, Encode, FromRow, Type};

/// A query on SQLite whose arguments borrow for `'q`.
pub type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Identifier types that can be bound to and read back from SQLite.
pub trait SqliteId:
    for<'q> Encode<'q, Sqlite>
    + for<'r> Decode<'r, Sqlite>
    + Type<Sqlite>
    + Clone
    + Send
    + Sync
    + 'static
{
}

impl<T> SqliteId for T where
    T: for<'q> Encode<'q, Sqlite>
        + for<'r> Decode<'r, Sqlite>
        + Type<Sqlite>
        + Clone
        + Send
        + Sync
        + 'static
{
}

/// An [`Entity`] stored by [`SqliteContext`](crate::SqliteContext).
///
/// Rows are decoded with `sqlx::FromRow`; values are written with
/// [`bind_columns`](SqliteEntity::bind_columns). The entity's `Id` must
/// implement [`SqliteId`].
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, sqlx::FromRow)]
/// struct UserEntity {
///     id: Option<i64>,
///     name: String,
///     email: String,
/// }
///
/// impl SqliteEntity for UserEntity {
///     fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
///         query.bind(self.name.as_str()).bind(self.email.as_str())
///     }
/// }
/// ```
pub trait SqliteEntity: Entity + for<'r> FromRow<'r, SqliteRow> {
    /// Bind every non-id column, in the order of `Entity::columns()`.
    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> SqliteQuery<'q>;
}
