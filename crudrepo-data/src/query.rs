/// SQL dialect: placeholder style and identifier quoting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Generic SQL using `?` placeholders (default).
    Generic,
    /// SQLite-style `?` placeholders.
    Sqlite,
    /// MySQL-style `?` placeholders with backtick quoting.
    MySql,
    /// Postgres-style `$1, $2, ...` placeholders.
    Postgres,
}

impl Dialect {
    fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Generic | Dialect::Sqlite | Dialect::MySql => "?".to_string(),
        }
    }

    fn quote_char(self) -> char {
        match self {
            Dialect::MySql => '`',
            Dialect::Generic | Dialect::Sqlite | Dialect::Postgres => '"',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierPolicy {
    /// Validate identifiers against a conservative pattern.
    Validate,
    /// Validate and quote identifiers using the dialect quoting style.
    Quote,
}

/// A small statement builder for the per-entity SQL used by providers.
///
/// Every value is rendered as a placeholder; callers bind values when the
/// statement is executed.
///
/// # Example
///
/// ```ignore
/// let sql = QueryBuilder::new_with_dialect("users", Dialect::Sqlite)
///     .identifier_policy(IdentifierPolicy::Quote)
///     .where_eq("id")
///     .build_select_checked(&["id", "name"])?;
/// assert_eq!(sql, r#"SELECT "id", "name" FROM "users" WHERE "id" = ?"#);
/// ```
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: String,
    conditions: Vec<String>,
    dialect: Dialect,
    identifier_policy: IdentifierPolicy,
}

impl QueryBuilder {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            conditions: Vec::new(),
            dialect: Dialect::Generic,
            identifier_policy: IdentifierPolicy::Validate,
        }
    }

    /// Create a new builder with an explicit SQL dialect.
    pub fn new_with_dialect(table: &str, dialect: Dialect) -> Self {
        Self::new(table).dialect(dialect)
    }

    /// Set the SQL dialect (affects placeholder style and quoting).
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Configure identifier quoting behavior.
    pub fn identifier_policy(mut self, policy: IdentifierPolicy) -> Self {
        self.identifier_policy = policy;
        self
    }

    /// Add a `column = <placeholder>` condition.
    pub fn where_eq(mut self, column: &str) -> Self {
        self.conditions.push(column.to_string());
        self
    }

    /// Build a SELECT over the given columns.
    pub fn build_select_checked(&self, columns: &[&str]) -> Result<String, QueryError> {
        let table = self.format_identifier_checked(&self.table, false, "table")?;
        let columns = self.format_column_list_checked(columns)?;

        let mut sql = format!("SELECT {columns} FROM {table}");
        let mut placeholder_idx = 1usize;
        self.append_where_checked(&mut sql, &mut placeholder_idx)?;
        Ok(sql)
    }

    /// Build a DELETE; without conditions it removes every row of the table.
    pub fn build_delete_checked(&self) -> Result<String, QueryError> {
        let table = self.format_identifier_checked(&self.table, false, "table")?;

        let mut sql = format!("DELETE FROM {table}");
        let mut placeholder_idx = 1usize;
        self.append_where_checked(&mut sql, &mut placeholder_idx)?;
        Ok(sql)
    }

    /// Build an INSERT of `columns`, optionally returning one column.
    ///
    /// An empty column list renders `DEFAULT VALUES`.
    pub fn build_insert_checked(
        &self,
        columns: &[&str],
        returning: Option<&str>,
    ) -> Result<String, QueryError> {
        let table = self.format_identifier_checked(&self.table, false, "table")?;

        let mut sql = if columns.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let names = self.format_column_list_checked(columns)?;
            let placeholders: Vec<_> = (1..=columns.len())
                .map(|idx| self.dialect.placeholder(idx))
                .collect();
            format!(
                "INSERT INTO {table} ({names}) VALUES ({})",
                placeholders.join(", ")
            )
        };
        if let Some(column) = returning {
            let column = self.format_identifier_checked(column, false, "column")?;
            sql.push_str(&format!(" RETURNING {column}"));
        }
        Ok(sql)
    }

    /// Build an UPDATE assigning every column in `columns`.
    pub fn build_update_checked(&self, columns: &[&str]) -> Result<String, QueryError> {
        if columns.is_empty() {
            return Err(QueryError::EmptyColumnList);
        }
        let table = self.format_identifier_checked(&self.table, false, "table")?;

        let mut placeholder_idx = 1usize;
        let mut assignments = Vec::with_capacity(columns.len());
        for column in columns {
            let column = self.format_identifier_checked(column, false, "column")?;
            assignments.push(format!(
                "{column} = {}",
                self.dialect.placeholder(placeholder_idx)
            ));
            placeholder_idx += 1;
        }

        let mut sql = format!("UPDATE {table} SET {}", assignments.join(", "));
        self.append_where_checked(&mut sql, &mut placeholder_idx)?;
        Ok(sql)
    }

    fn append_where_checked(
        &self,
        sql: &mut String,
        placeholder_idx: &mut usize,
    ) -> Result<(), QueryError> {
        if self.conditions.is_empty() {
            return Ok(());
        }
        let mut clauses = Vec::with_capacity(self.conditions.len());
        for col in &self.conditions {
            let col = self.format_identifier_checked(col, false, "column")?;
            let placeholder = self.dialect.placeholder(*placeholder_idx);
            *placeholder_idx += 1;
            clauses.push(format!("{col} = {placeholder}"));
        }
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
        Ok(())
    }

    fn format_column_list_checked(&self, columns: &[&str]) -> Result<String, QueryError> {
        if columns.is_empty() {
            return Err(QueryError::EmptyColumnList);
        }
        let mut out = Vec::with_capacity(columns.len());
        for col in columns {
            out.push(self.format_identifier_checked(col, true, "column")?);
        }
        Ok(out.join(", "))
    }

    fn format_identifier_checked(
        &self,
        ident: &str,
        allow_star: bool,
        kind: &'static str,
    ) -> Result<String, QueryError> {
        if !is_valid_identifier(ident, allow_star) {
            return Err(QueryError::InvalidIdentifier {
                kind,
                ident: ident.to_string(),
            });
        }
        match self.identifier_policy {
            IdentifierPolicy::Quote => Ok(quote_identifier(ident, self.dialect, allow_star)),
            IdentifierPolicy::Validate => Ok(ident.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    InvalidIdentifier { kind: &'static str, ident: String },
    EmptyColumnList,
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::InvalidIdentifier { kind, ident } => {
                write!(f, "Invalid {kind} identifier: {ident}")
            }
            QueryError::EmptyColumnList => write!(f, "Column list must not be empty"),
        }
    }
}

impl std::error::Error for QueryError {}

fn is_valid_identifier(ident: &str, allow_star: bool) -> bool {
    if ident.is_empty() {
        return false;
    }
    let parts: Vec<&str> = ident.split('.').collect();
    for (idx, part) in parts.iter().enumerate() {
        if allow_star && *part == "*" {
            return idx + 1 == parts.len();
        }
        if !is_valid_segment(part) {
            return false;
        }
    }
    true
}

fn is_valid_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn quote_identifier(ident: &str, dialect: Dialect, allow_star: bool) -> String {
    let quote = dialect.quote_char();
    let parts: Vec<&str> = ident.split('.').collect();
    let last_idx = parts.len().saturating_sub(1);
    parts
        .into_iter()
        .enumerate()
        .map(|(idx, part)| {
            if allow_star && part == "*" && idx == last_idx {
                part.to_string()
            } else {
                format!("{quote}{part}{quote}")
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}
