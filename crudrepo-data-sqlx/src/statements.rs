use crudrepo_data::{DataError, Dialect, EntityDescriptor, IdentifierPolicy, QueryBuilder};

/// Per-entity SQL compiled once per table and shared by every write.
#[derive(Debug)]
pub(crate) struct EntityStatements {
    pub insert: String,
    /// `None` when the entity has no column besides its id.
    pub update: Option<String>,
    pub select_by_id: String,
    pub delete_by_id: String,
}

impl EntityStatements {
    pub fn compile(descriptor: &EntityDescriptor) -> Result<Self, DataError> {
        descriptor.validate()?;
        let builder = || {
            QueryBuilder::new_with_dialect(descriptor.table, Dialect::Sqlite)
                .identifier_policy(IdentifierPolicy::Quote)
        };
        let value_columns = descriptor.value_columns();

        let insert = builder().build_insert_checked(&value_columns, Some(descriptor.id_column))?;
        let update = if value_columns.is_empty() {
            None
        } else {
            Some(
                builder()
                    .where_eq(descriptor.id_column)
                    .build_update_checked(&value_columns)?,
            )
        };
        let select_by_id = builder()
            .where_eq(descriptor.id_column)
            .build_select_checked(descriptor.columns)?;
        let delete_by_id = builder()
            .where_eq(descriptor.id_column)
            .build_delete_checked()?;

        Ok(Self {
            insert,
            update,
            select_by_id,
            delete_by_id,
        })
    }
}
