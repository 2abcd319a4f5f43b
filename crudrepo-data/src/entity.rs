use std::fmt::{Debug, Display};
use std::hash::Hash;

use crate::error::DataError;

/// Trait representing a persisted entity with a table name, id column, and column list.
///
/// `id()` returns `None` for transient entities whose identifier has not
/// been generated yet. Providers call `set_id` once the store assigns one.
///
/// # Example
///
/// ```ignore
/// impl Entity for UserEntity {
///     type Id = i64;
///     fn table_name() -> &'static str { "users" }
///     fn id_column() -> &'static str { "id" }
///     fn columns() -> &'static [&'static str] { &["id", "name", "email"] }
///     fn id(&self) -> Option<&i64> { self.id.as_ref() }
///     fn set_id(&mut self, id: i64) { self.id = Some(id); }
/// }
/// ```
pub trait Entity: Clone + Send + Sync + Unpin + 'static {
    type Id: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static;

    fn table_name() -> &'static str;
    fn id_column() -> &'static str;
    fn columns() -> &'static [&'static str];
    fn id(&self) -> Option<&Self::Id>;
    fn set_id(&mut self, id: Self::Id);

    /// The type descriptor used to compile queries for this entity.
    fn descriptor() -> EntityDescriptor {
        EntityDescriptor {
            table: Self::table_name(),
            id_column: Self::id_column(),
            columns: Self::columns(),
        }
    }
}

/// Reflection-free description of an entity's storage shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub table: &'static str,
    pub id_column: &'static str,
    pub columns: &'static [&'static str],
}

impl EntityDescriptor {
    /// Columns written on insert and update, in declaration order.
    pub fn value_columns(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .copied()
            .filter(|column| *column != self.id_column)
            .collect()
    }

    /// Check the descriptor is usable for query compilation.
    pub fn validate(&self) -> Result<(), DataError> {
        if self.table.trim().is_empty() {
            return Err(DataError::InvalidArgument(
                "entity table name must not be empty".into(),
            ));
        }
        if !self.columns.contains(&self.id_column) {
            return Err(DataError::InvalidArgument(format!(
                "id column '{}' is not listed in the columns of '{}'",
                self.id_column, self.table
            )));
        }
        Ok(())
    }
}
