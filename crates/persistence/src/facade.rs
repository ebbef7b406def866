//! Uniform CRUD over the active backend.
//!
//! Callers describe tables with a [`TableDef`] and exchange [`Record`]s of
//! backend-agnostic [`Value`]s. The façade validates identifiers against the
//! table definition, encodes values for the active dialect and normalizes
//! results on the way back, so the same calls yield the same fields, types and
//! ordering on every backend:
//!
//! - booleans come back as [`Value::Bool`] even where the backend stores integers
//! - timestamps come back as RFC 3339 UTC text with microsecond precision
//! - generated ids come back as [`Value::Integer`], client ids as UUID text
//! - rows are ordered by the requested column, then by the id column
//!
//! Soft-deleted rows are invisible unless the filter asks for them.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Timelike, Utc};
use uuid::Uuid;

use crate::core::{Connection, Dialect, Record, Value};
use crate::error::{BackendError, QueryError, StoreResult};
use crate::selector::BackendHandle;

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// 64-bit integer.
    Integer,
    /// Double precision float. Integers are widened.
    Real,
    /// Text.
    Text,
    /// Boolean, stored natively or as 0/1.
    Bool,
    /// Instant, exchanged as RFC 3339 text.
    Timestamp,
    /// UUID, exchanged as lowercase hyphenated text.
    Uuid,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::Text => "text",
            ColumnType::Bool => "bool",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Uuid => "uuid",
        };
        f.write_str(name)
    }
}

/// How row identifiers are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// The backend generates an integer id (sequence or auto-increment).
    Generated,
    /// The façade generates a UUID v4 unless the caller supplies one.
    ClientUuid,
}

/// One column of a [`TableDef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub ty: ColumnType,
    /// Whether NULL may be written.
    pub nullable: bool,
}

/// Table description used to validate and translate façade calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    name: String,
    id_column: String,
    id_strategy: IdStrategy,
    columns: Vec<ColumnDef>,
    soft_delete: Option<String>,
}

impl TableDef {
    /// Starts a definition with its id column.
    pub fn new(name: impl Into<String>, id_column: impl Into<String>, id_strategy: IdStrategy) -> Self {
        let id_column = id_column.into();
        let ty = match id_strategy {
            IdStrategy::Generated => ColumnType::Integer,
            IdStrategy::ClientUuid => ColumnType::Uuid,
        };
        Self {
            name: name.into(),
            columns: vec![ColumnDef {
                name: id_column.clone(),
                ty,
                nullable: false,
            }],
            id_column,
            id_strategy,
            soft_delete: None,
        }
    }

    /// Adds a NOT NULL column.
    pub fn column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            ty,
            nullable: false,
        });
        self
    }

    /// Adds a nullable column.
    pub fn nullable(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            ty,
            nullable: true,
        });
        self
    }

    /// Marks rows deleted by setting a nullable timestamp column.
    pub fn soft_delete(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        self.columns.push(ColumnDef {
            name: column.clone(),
            ty: ColumnType::Timestamp,
            nullable: true,
        });
        self.soft_delete = Some(column);
        self
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id column name.
    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Id strategy.
    pub fn id_strategy(&self) -> IdStrategy {
        self.id_strategy
    }

    /// All columns, id first.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Looks up a column.
    pub fn column_def(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Soft-delete column, if any.
    pub fn soft_delete_column(&self) -> Option<&str> {
        self.soft_delete.as_deref()
    }

    fn require(&self, column: &str) -> Result<&ColumnDef, QueryError> {
        self.column_def(column).ok_or_else(|| QueryError::UnknownColumn {
            table: self.name.clone(),
            column: column.to_string(),
        })
    }

    fn validate(&self) -> Result<(), QueryError> {
        check_ident(&self.name)?;
        self.columns.iter().try_for_each(|c| check_ident(&c.name))
    }
}

fn check_ident(ident: &str) -> Result<(), QueryError> {
    let mut chars = ident.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(QueryError::InvalidIdentifier {
            ident: ident.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Eq(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
    NotNull(String),
}

/// Conjunction of column conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
    include_deleted: bool,
}

impl Filter {
    /// Matches every live row.
    pub fn new() -> Self {
        Self::default()
    }

    /// `column = value`.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(column.into(), value.into()));
        self
    }

    /// `column IN (values)`. An empty list matches nothing.
    pub fn is_in<V: Into<Value>>(
        mut self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.conditions.push(Condition::In(
            column.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// `column IS NULL`.
    pub fn is_null(mut self, column: impl Into<String>) -> Self {
        self.conditions.push(Condition::IsNull(column.into()));
        self
    }

    /// `column IS NOT NULL`.
    pub fn not_null(mut self, column: impl Into<String>) -> Self {
        self.conditions.push(Condition::NotNull(column.into()));
        self
    }

    /// Also matches soft-deleted rows.
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// Ordering and paging for [`QueryFacade::find`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    order_by: Option<(String, SortOrder)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl FindOptions {
    /// Sorts by `column`; the id column breaks ties.
    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some((column.into(), order));
        self
    }

    /// Returns at most `limit` rows.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the first `offset` rows.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Backend-agnostic CRUD bound to the active backend.
#[derive(Debug, Clone)]
pub struct QueryFacade {
    handle: Arc<BackendHandle>,
}

impl QueryFacade {
    /// Creates a façade over `handle`.
    pub fn new(handle: Arc<BackendHandle>) -> Self {
        Self { handle }
    }

    /// The backend this façade talks to.
    pub fn handle(&self) -> &Arc<BackendHandle> {
        &self.handle
    }

    /// Returns matching rows.
    pub async fn find(&self, table: &TableDef, filter: &Filter, options: &FindOptions) -> StoreResult<Vec<Record>> {
        table.validate()?;
        let dialect = self.handle.dialect();
        let mut sql = SqlBuilder::new(dialect);

        let columns = table
            .columns()
            .iter()
            .map(|c| dialect.quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let where_clause = sql.where_clause(table, filter)?;
        let order = order_clause(table, options, dialect)?;

        let mut text = format!(
            "SELECT {} FROM {}{} ORDER BY {}",
            columns,
            dialect.quote_ident(table.name()),
            where_clause,
            order
        );
        match (options.limit, options.offset) {
            (Some(limit), offset) => {
                text.push_str(&format!(" LIMIT {}", limit));
                if let Some(offset) = offset {
                    text.push_str(&format!(" OFFSET {}", offset));
                }
            }
            (None, Some(offset)) => text.push_str(&format!(" LIMIT {} OFFSET {}", i64::MAX, offset)),
            (None, None) => {}
        }

        let mut conn = self.handle.acquire().await?;
        let rows = conn.query(&text, &sql.params).await?;
        rows.into_iter().map(|row| decode(table, row)).collect()
    }

    /// Returns the live row with the given id.
    pub async fn find_by_id(&self, table: &TableDef, id: impl Into<Value>) -> StoreResult<Option<Record>> {
        let filter = Filter::new().eq(table.id_column(), id);
        let rows = self.find(table, &filter, &FindOptions::default().limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    /// Inserts a row and returns it as stored, id included.
    ///
    /// Columns left out take their backend defaults.
    pub async fn insert(&self, table: &TableDef, values: Record) -> StoreResult<Record> {
        table.validate()?;
        let dialect = self.handle.dialect();
        let mut sql = SqlBuilder::new(dialect);

        let mut values = values;
        let client_id = match table.id_strategy() {
            IdStrategy::Generated => {
                if values.contains_key(table.id_column()) {
                    return Err(QueryError::ImmutableColumn {
                        table: table.name().to_string(),
                        column: table.id_column().to_string(),
                    }
                    .into());
                }
                None
            }
            IdStrategy::ClientUuid => {
                let id = values
                    .entry(table.id_column().to_string())
                    .or_insert_with(|| Value::Text(Uuid::new_v4().to_string()));
                Some(encode(table, table.id_column(), id.clone(), dialect)?)
            }
        };

        let mut names = Vec::with_capacity(values.len());
        let mut placeholders = Vec::with_capacity(values.len());
        for (column, value) in values {
            let encoded = encode(table, &column, value, dialect)?;
            names.push(dialect.quote_ident(&column));
            placeholders.push(sql.bind(encoded));
        }

        let mut text = if names.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", dialect.quote_ident(table.name()))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                dialect.quote_ident(table.name()),
                names.join(", "),
                placeholders.join(", ")
            )
        };

        let mut conn = self.handle.acquire().await?;
        let id = match client_id {
            Some(id) => {
                conn.execute(&text, &sql.params).await?;
                id
            }
            None => generated_id(&mut *conn, dialect, &mut text, &sql.params, table.id_column()).await?,
        };

        let select = format!(
            "SELECT {} FROM {} WHERE {} = {}",
            table
                .columns()
                .iter()
                .map(|c| dialect.quote_ident(&c.name))
                .collect::<Vec<_>>()
                .join(", "),
            dialect.quote_ident(table.name()),
            dialect.quote_ident(table.id_column()),
            dialect.placeholder(1)
        );
        let row = conn
            .query(&select, &[id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::MissingInsertedRow {
                table: table.name().to_string(),
            })?;
        tracing::debug!(table = %table.name(), "Inserted row");
        decode(table, row)
    }

    /// Sets `changes` on every live row matching `filter`. Returns the number
    /// of rows changed.
    pub async fn update(&self, table: &TableDef, filter: &Filter, changes: Record) -> StoreResult<u64> {
        table.validate()?;
        if changes.is_empty() {
            return Err(QueryError::EmptyUpdate {
                table: table.name().to_string(),
            }
            .into());
        }
        let dialect = self.handle.dialect();
        let mut sql = SqlBuilder::new(dialect);

        let mut assignments = Vec::with_capacity(changes.len());
        for (column, value) in changes {
            if column == table.id_column() {
                return Err(QueryError::ImmutableColumn {
                    table: table.name().to_string(),
                    column,
                }
                .into());
            }
            let encoded = encode(table, &column, value, dialect)?;
            assignments.push(format!("{} = {}", dialect.quote_ident(&column), sql.bind(encoded)));
        }
        let where_clause = sql.where_clause(table, filter)?;

        let text = format!(
            "UPDATE {} SET {}{}",
            dialect.quote_ident(table.name()),
            assignments.join(", "),
            where_clause
        );
        let mut conn = self.handle.acquire().await?;
        Ok(conn.execute(&text, &sql.params).await?)
    }

    /// Flags the row with the given id as deleted. Returns false when no live
    /// row had that id.
    pub async fn soft_delete(&self, table: &TableDef, id: impl Into<Value>) -> StoreResult<bool> {
        table.validate()?;
        let Some(flag) = table.soft_delete_column() else {
            return Err(QueryError::SoftDeleteUnsupported {
                table: table.name().to_string(),
            }
            .into());
        };
        let dialect = self.handle.dialect();
        let mut sql = SqlBuilder::new(dialect);

        let now = sql.bind(Value::Text(canonical_timestamp(Utc::now())));
        let id = encode(table, table.id_column(), id.into(), dialect)?;
        let id = sql.bind(id);
        let text = format!(
            "UPDATE {} SET {} = {} WHERE {} = {} AND {} IS NULL",
            dialect.quote_ident(table.name()),
            dialect.quote_ident(flag),
            now,
            dialect.quote_ident(table.id_column()),
            id,
            dialect.quote_ident(flag)
        );

        let mut conn = self.handle.acquire().await?;
        let affected = conn.execute(&text, &sql.params).await?;
        Ok(affected > 0)
    }

    /// Counts rows matching `filter`.
    pub async fn count(&self, table: &TableDef, filter: &Filter) -> StoreResult<u64> {
        table.validate()?;
        let dialect = self.handle.dialect();
        let mut sql = SqlBuilder::new(dialect);
        let where_clause = sql.where_clause(table, filter)?;
        let text = format!(
            "SELECT COUNT(*) AS n FROM {}{}",
            dialect.quote_ident(table.name()),
            where_clause
        );

        let mut conn = self.handle.acquire().await?;
        let rows = conn.query(&text, &sql.params).await?;
        let count = rows
            .first()
            .and_then(|row| row.get("n"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

impl SortOrder {
    fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    // NULL sorts as the smallest value on every backend.
    fn nulls(self) -> &'static str {
        match self {
            SortOrder::Asc => "NULLS FIRST",
            SortOrder::Desc => "NULLS LAST",
        }
    }
}

/// Sort keys for `find`: the requested column, then the id column.
fn order_clause(table: &TableDef, options: &FindOptions, dialect: &dyn Dialect) -> Result<String, QueryError> {
    let mut keys = Vec::new();
    if let Some((column, direction)) = &options.order_by {
        keys.push(sort_key(table.require(column)?, *direction, dialect));
    }
    if options.order_by.as_ref().is_none_or(|(c, _)| c != table.id_column()) {
        keys.push(sort_key(table.require(table.id_column())?, SortOrder::Asc, dialect));
    }
    Ok(keys.join(", "))
}

fn sort_key(column: &ColumnDef, direction: SortOrder, dialect: &dyn Dialect) -> String {
    let mut key = dialect.quote_ident(&column.name);
    if column.ty == ColumnType::Text
        && let Some(collation) = dialect.text_collation()
    {
        key.push_str(" COLLATE ");
        key.push_str(collation);
    }
    format!("{} {} {}", key, direction.keyword(), direction.nulls())
}

async fn generated_id(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
    text: &mut String,
    params: &[Value],
    id_column: &str,
) -> StoreResult<Value> {
    let id = if let Some(returning) = dialect.returning_clause(id_column) {
        text.push_str(&returning);
        conn.query(text, params)
            .await?
            .into_iter()
            .next()
            .and_then(|mut row| row.remove(id_column))
    } else if let Some(last_id) = dialect.last_insert_id_query() {
        conn.execute(text, params).await?;
        conn.query(last_id, &[])
            .await?
            .into_iter()
            .next()
            .and_then(|mut row| row.remove("id"))
    } else {
        return Err(BackendError::Internal {
            backend_name: dialect.kind().to_string(),
            message: "dialect cannot report generated ids".to_string(),
            source: None,
        }
        .into());
    };

    id.filter(|v| !v.is_null()).ok_or_else(|| {
        BackendError::Internal {
            backend_name: dialect.kind().to_string(),
            message: "insert did not report a generated id".to_string(),
            source: None,
        }
        .into()
    })
}

struct SqlBuilder<'d> {
    dialect: &'d dyn Dialect,
    params: Vec<Value>,
}

impl<'d> SqlBuilder<'d> {
    fn new(dialect: &'d dyn Dialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    /// Renders ` WHERE ...`, or an empty string when nothing applies.
    fn where_clause(&mut self, table: &TableDef, filter: &Filter) -> Result<String, QueryError> {
        let mut parts = Vec::new();
        for condition in &filter.conditions {
            let part = match condition {
                Condition::Eq(column, value) => {
                    let encoded = encode_operand(table, column, value.clone(), self.dialect)?;
                    if encoded.is_null() {
                        format!("{} IS NULL", self.dialect.quote_ident(column))
                    } else {
                        format!("{} = {}", self.dialect.quote_ident(column), self.bind(encoded))
                    }
                }
                Condition::In(column, values) => {
                    if values.is_empty() {
                        table.require(column)?;
                        "1 = 0".to_string()
                    } else {
                        let mut placeholders = Vec::with_capacity(values.len());
                        for value in values {
                            let encoded = encode_operand(table, column, value.clone(), self.dialect)?;
                            placeholders.push(self.bind(encoded));
                        }
                        format!(
                            "{} IN ({})",
                            self.dialect.quote_ident(column),
                            placeholders.join(", ")
                        )
                    }
                }
                Condition::IsNull(column) => {
                    table.require(column)?;
                    format!("{} IS NULL", self.dialect.quote_ident(column))
                }
                Condition::NotNull(column) => {
                    table.require(column)?;
                    format!("{} IS NOT NULL", self.dialect.quote_ident(column))
                }
            };
            parts.push(part);
        }

        if !filter.include_deleted
            && let Some(flag) = table.soft_delete_column()
        {
            parts.push(format!("{} IS NULL", self.dialect.quote_ident(flag)));
        }

        if parts.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(" WHERE {}", parts.join(" AND ")))
        }
    }
}

/// Encodes a filter operand. NULL is always allowed here.
fn encode_operand(table: &TableDef, column: &str, value: Value, dialect: &dyn Dialect) -> Result<Value, QueryError> {
    if value.is_null() {
        table.require(column)?;
        return Ok(Value::Null);
    }
    encode(table, column, value, dialect)
}

/// Converts a caller value into the representation the dialect stores.
fn encode(table: &TableDef, column: &str, value: Value, dialect: &dyn Dialect) -> Result<Value, QueryError> {
    let def = table.require(column)?;
    let mismatch = || QueryError::TypeMismatch {
        table: table.name().to_string(),
        column: column.to_string(),
        expected: def.ty.to_string(),
    };

    match (def.ty, value) {
        (_, Value::Null) if def.nullable => Ok(Value::Null),
        (_, Value::Null) => Err(mismatch()),
        (ColumnType::Integer, Value::Integer(i)) => Ok(Value::Integer(i)),
        (ColumnType::Real, Value::Real(r)) => Ok(Value::Real(r)),
        (ColumnType::Real, Value::Integer(i)) => Ok(Value::Real(i as f64)),
        (ColumnType::Text, Value::Text(s)) => Ok(Value::Text(s)),
        (ColumnType::Bool, Value::Bool(b)) => Ok(dialect.encode_bool(b)),
        (ColumnType::Timestamp, Value::Text(s)) => parse_timestamp(&s)
            .map(|t| Value::Text(canonical_timestamp(t)))
            .ok_or_else(mismatch),
        (ColumnType::Uuid, Value::Text(s)) => Uuid::parse_str(&s)
            .map(|u| Value::Text(u.hyphenated().to_string()))
            .map_err(|_| mismatch()),
        _ => Err(mismatch()),
    }
}

/// Normalizes a fetched row to the declared column types.
fn decode(table: &TableDef, row: Record) -> StoreResult<Record> {
    row.into_iter()
        .map(|(column, value)| {
            let value = match (table.column_def(&column).map(|c| c.ty), value) {
                (Some(ColumnType::Bool), Value::Integer(i)) => Value::Bool(i != 0),
                (Some(ColumnType::Real), Value::Integer(i)) => Value::Real(i as f64),
                (Some(ColumnType::Timestamp), Value::Text(s)) => match parse_timestamp(&s) {
                    Some(t) => Value::Text(canonical_timestamp(t)),
                    None => Value::Text(s),
                },
                (Some(ColumnType::Uuid), Value::Text(s)) => Value::Text(s.to_ascii_lowercase()),
                (_, value) => value,
            };
            Ok((column, value))
        })
        .collect()
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })
}

/// Fixed-width RFC 3339 so text comparison orders like time.
fn canonical_timestamp(t: DateTime<Utc>) -> String {
    let micros = t.nanosecond() / 1_000 * 1_000;
    t.with_nanosecond(micros)
        .unwrap_or(t)
        .to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(all(test, feature = "sqlite", feature = "postgres"))]
mod tests {
    use super::*;
    use crate::backends::postgres::PostgresDialect;
    use crate::backends::sqlite::SqliteDialect;

    fn roles() -> TableDef {
        TableDef::new("roles", "id", IdStrategy::Generated)
            .column("slug", ColumnType::Text)
            .column("is_active", ColumnType::Bool)
            .nullable("description", ColumnType::Text)
            .soft_delete("deleted_at")
    }

    #[test]
    fn test_table_def_columns() {
        let table = roles();
        assert_eq!(table.columns()[0].name, "id");
        assert_eq!(table.columns()[0].ty, ColumnType::Integer);
        assert_eq!(table.soft_delete_column(), Some("deleted_at"));
        assert!(table.column_def("deleted_at").unwrap().nullable);

        let members = TableDef::new("members", "id", IdStrategy::ClientUuid);
        assert_eq!(members.columns()[0].ty, ColumnType::Uuid);
    }

    #[test]
    fn test_identifier_validation() {
        assert!(check_ident("members").is_ok());
        assert!(check_ident("_x1").is_ok());
        assert!(check_ident("1x").is_err());
        assert!(check_ident("a b").is_err());
        assert!(check_ident("x\"; DROP TABLE y; --").is_err());
        assert!(check_ident("").is_err());
    }

    #[test]
    fn test_where_clause_per_dialect() {
        let table = roles();
        let filter = Filter::new()
            .eq("slug", "admin")
            .is_in("id", [1_i64, 2])
            .eq("is_active", true);

        let mut sql = SqlBuilder::new(&SqliteDialect);
        let clause = sql.where_clause(&table, &filter).unwrap();
        assert_eq!(
            clause,
            " WHERE \"slug\" = ?1 AND \"id\" IN (?2, ?3) AND \"is_active\" = ?4 AND \"deleted_at\" IS NULL"
        );
        assert_eq!(sql.params[3], Value::Integer(1));

        let mut sql = SqlBuilder::new(&PostgresDialect);
        let clause = sql.where_clause(&table, &filter).unwrap();
        assert!(clause.starts_with(" WHERE \"slug\" = $1 AND \"id\" IN ($2, $3)"));
        assert_eq!(sql.params[3], Value::Bool(true));
    }

    #[test]
    fn test_order_clause_per_dialect() {
        let table = roles();
        let by_description = FindOptions::default().order_by("description", SortOrder::Desc);

        assert_eq!(
            order_clause(&table, &by_description, &SqliteDialect).unwrap(),
            "\"description\" DESC NULLS LAST, \"id\" ASC NULLS FIRST"
        );
        assert_eq!(
            order_clause(&table, &by_description, &PostgresDialect).unwrap(),
            "\"description\" COLLATE \"C\" DESC NULLS LAST, \"id\" ASC NULLS FIRST"
        );

        let by_id = FindOptions::default().order_by("id", SortOrder::Desc);
        for dialect in [&SqliteDialect as &dyn Dialect, &PostgresDialect] {
            assert_eq!(
                order_clause(&table, &by_id, dialect).unwrap(),
                "\"id\" DESC NULLS LAST"
            );
        }

        let unknown = FindOptions::default().order_by("nickname", SortOrder::Asc);
        assert!(matches!(
            order_clause(&table, &unknown, &SqliteDialect),
            Err(QueryError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_where_clause_include_deleted_and_empty_in() {
        let table = roles();
        let mut sql = SqlBuilder::new(&SqliteDialect);
        let filter = Filter::new().is_in("slug", Vec::<String>::new()).include_deleted();
        assert_eq!(sql.where_clause(&table, &filter).unwrap(), " WHERE 1 = 0");

        let mut sql = SqlBuilder::new(&SqliteDialect);
        let clause = sql
            .where_clause(&table, &Filter::new().include_deleted())
            .unwrap();
        assert_eq!(clause, "");
    }

    #[test]
    fn test_eq_null_becomes_is_null() {
        let mut sql = SqlBuilder::new(&SqliteDialect);
        let clause = sql
            .where_clause(&roles(), &Filter::new().eq("slug", Value::Null).include_deleted())
            .unwrap();
        assert_eq!(clause, " WHERE \"slug\" IS NULL");
        assert!(sql.params.is_empty());
    }

    #[test]
    fn test_unknown_column_rejected() {
        let mut sql = SqlBuilder::new(&SqliteDialect);
        let err = sql
            .where_clause(&roles(), &Filter::new().eq("nope", 1))
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownColumn { .. }));
    }

    #[test]
    fn test_encode_type_checks() {
        let table = roles();
        assert!(matches!(
            encode(&table, "slug", Value::Integer(1), &SqliteDialect),
            Err(QueryError::TypeMismatch { .. })
        ));
        assert!(matches!(
            encode(&table, "slug", Value::Null, &SqliteDialect),
            Err(QueryError::TypeMismatch { .. })
        ));
        assert_eq!(
            encode(&table, "description", Value::Null, &SqliteDialect).unwrap(),
            Value::Null
        );
        assert_eq!(
            encode(&table, "is_active", Value::Bool(false), &SqliteDialect).unwrap(),
            Value::Integer(0)
        );
    }

    #[test]
    fn test_timestamps_are_canonical() {
        let table = roles();
        let encoded = encode(
            &table,
            "deleted_at",
            Value::from("2026-03-01T10:15:00+02:00"),
            &PostgresDialect,
        )
        .unwrap();
        assert_eq!(encoded, Value::from("2026-03-01T08:15:00.000000Z"));

        let row = decode(
            &table,
            [("deleted_at".to_string(), Value::from("2026-03-01 08:15:00"))]
                .into_iter()
                .collect(),
        )
        .unwrap();
        assert_eq!(row["deleted_at"], Value::from("2026-03-01T08:15:00.000000Z"));

        assert!(matches!(
            encode(&table, "deleted_at", Value::from("yesterday"), &SqliteDialect),
            Err(QueryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_normalizes_bools() {
        let row = decode(
            &roles(),
            [
                ("id".to_string(), Value::Integer(4)),
                ("is_active".to_string(), Value::Integer(1)),
            ]
            .into_iter()
            .collect(),
        )
        .unwrap();
        assert_eq!(row["is_active"], Value::Bool(true));
        assert_eq!(row["id"], Value::Integer(4));
    }

    #[test]
    fn test_uuid_encoding() {
        let members = TableDef::new("members", "id", IdStrategy::ClientUuid);
        let id = "6F9619FF-8B86-D011-B42D-00C04FC964FF";
        assert_eq!(
            encode(&members, "id", Value::from(id), &SqliteDialect).unwrap(),
            Value::from("6f9619ff-8b86-d011-b42d-00c04fc964ff")
        );
        assert!(encode(&members, "id", Value::from("not-a-uuid"), &SqliteDialect).is_err());
    }
}
