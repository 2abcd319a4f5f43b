//! Precompiled, entity-scoped query objects.
//!
//! A [`TypedQuery<T>`] or [`Statement<T>`] is built once from `T`'s
//! descriptor and reused for every execution. The type parameter pins the
//! query to the entity it was compiled for.

use std::fmt;
use std::marker::PhantomData;

use crate::entity::{Entity, EntityDescriptor};
use crate::error::DataError;
use crate::query::{Dialect, IdentifierPolicy, QueryBuilder};

/// A compiled query yielding rows of `T`.
pub struct TypedQuery<T> {
    table: &'static str,
    sql: String,
    _marker: PhantomData<fn() -> T>,
}

/// A compiled statement over `T`'s table that yields an affected row count.
pub struct Statement<T> {
    kind: StatementKind,
    table: &'static str,
    sql: String,
    _marker: PhantomData<fn() -> T>,
}

/// What a [`Statement`] does, for providers that do not execute SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    DeleteAll,
}

impl<T: Entity> TypedQuery<T> {
    /// Compile `SELECT <columns> FROM <table>` for `T`.
    pub fn select_all(
        descriptor: &EntityDescriptor,
        dialect: Dialect,
        policy: IdentifierPolicy,
    ) -> Result<Self, DataError> {
        ensure_scoped::<T>(descriptor)?;
        let sql = QueryBuilder::new_with_dialect(descriptor.table, dialect)
            .identifier_policy(policy)
            .build_select_checked(descriptor.columns)?;
        Ok(Self {
            table: descriptor.table,
            sql,
            _marker: PhantomData,
        })
    }
}

impl<T> TypedQuery<T> {
    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl<T: Entity> Statement<T> {
    /// Compile `DELETE FROM <table>` for `T`.
    pub fn delete_all(
        descriptor: &EntityDescriptor,
        dialect: Dialect,
        policy: IdentifierPolicy,
    ) -> Result<Self, DataError> {
        ensure_scoped::<T>(descriptor)?;
        let sql = QueryBuilder::new_with_dialect(descriptor.table, dialect)
            .identifier_policy(policy)
            .build_delete_checked()?;
        Ok(Self {
            kind: StatementKind::DeleteAll,
            table: descriptor.table,
            sql,
            _marker: PhantomData,
        })
    }
}

impl<T> Statement<T> {
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl<T> fmt::Debug for TypedQuery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedQuery")
            .field("table", &self.table)
            .field("sql", &self.sql)
            .finish()
    }
}

impl<T> fmt::Debug for Statement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("kind", &self.kind)
            .field("table", &self.table)
            .field("sql", &self.sql)
            .finish()
    }
}

fn ensure_scoped<T: Entity>(descriptor: &EntityDescriptor) -> Result<(), DataError> {
    descriptor.validate()?;
    if *descriptor != T::descriptor() {
        return Err(DataError::InvalidArgument(format!(
            "descriptor for '{}' does not describe entity type {}",
            descriptor.table,
            std::any::type_name::<T>()
        )));
    }
    Ok(())
}
