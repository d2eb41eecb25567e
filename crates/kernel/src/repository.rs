//! Statement execution over sqlx's `Any` driver.
//!
//! The query engine builds sea-query statements; this module renders them
//! for the configured dialect, binds the collected values, runs them on a
//! pool or inside a transaction, and decodes rows into [`Record`]s.

use async_trait::async_trait;
use sea_query::{
    DeleteStatement, InsertStatement, PostgresQueryBuilder, QueryBuilder,
    SelectStatement, SqliteQueryBuilder, UpdateStatement, Value, Values,
};
use serde_json::Value as JsonValue;
use sqlx::AnyPool;
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::{Any, Row, Transaction};

use crate::error::{QueryError, QueryResult};
use crate::query::metadata::{ColumnType, EntityMetadata, Record};

/// SQL dialect, chosen from the database URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    pub fn from_url(url: &str) -> QueryResult<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Dialect::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Dialect::Sqlite)
        } else {
            Err(QueryError::Configuration(format!(
                "unsupported database URL scheme: {}",
                url.split(':').next().unwrap_or_default()
            )))
        }
    }

    fn query_builder(&self) -> &'static dyn QueryBuilder {
        match self {
            Dialect::Postgres => &PostgresQueryBuilder,
            Dialect::Sqlite => &SqliteQueryBuilder,
        }
    }
}

/// Any statement the engine produces.
#[derive(Debug, Clone)]
pub enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

impl Statement {
    /// Render SQL with placeholders plus the values to bind.
    pub fn build(&self, dialect: Dialect) -> (String, Values) {
        let builder = dialect.query_builder();
        match self {
            Statement::Select(s) => s.build_any(builder),
            Statement::Insert(s) => s.build_any(builder),
            Statement::Update(s) => s.build_any(builder),
            Statement::Delete(s) => s.build_any(builder),
        }
    }
}

impl From<SelectStatement> for Statement {
    fn from(statement: SelectStatement) -> Self {
        Statement::Select(statement)
    }
}

impl From<InsertStatement> for Statement {
    fn from(statement: InsertStatement) -> Self {
        Statement::Insert(statement)
    }
}

impl From<UpdateStatement> for Statement {
    fn from(statement: UpdateStatement) -> Self {
        Statement::Update(statement)
    }
}

impl From<DeleteStatement> for Statement {
    fn from(statement: DeleteStatement) -> Self {
        Statement::Delete(statement)
    }
}

/// How to decode one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }

    /// Every storable column of an entity, in declaration order.
    pub fn for_entity(meta: &EntityMetadata) -> Vec<ColumnSpec> {
        meta.columns
            .iter()
            .map(|c| ColumnSpec::new(c.name.clone(), c.column_type))
            .collect()
    }
}

/// An open unit of work: a transaction, or plain pool access.
#[async_trait]
pub trait Session: Send {
    fn dialect(&self) -> Dialect;

    fn is_transactional(&self) -> bool;

    async fn fetch_all(
        &mut self,
        statement: Statement,
        columns: &[ColumnSpec],
    ) -> QueryResult<Vec<Record>>;

    /// Run a statement whose first column is a count.
    async fn fetch_count(&mut self, statement: Statement) -> QueryResult<u64>;

    /// Run a statement and return the number of affected rows.
    async fn execute(&mut self, statement: Statement) -> QueryResult<u64>;

    /// Commit a transactional session; a no-op otherwise.
    async fn commit(self: Box<Self>) -> QueryResult<()>;
}

/// Source of sessions.
#[async_trait]
pub trait Repository: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// A non-transactional session for reads.
    async fn session(&self) -> QueryResult<Box<dyn Session>>;

    /// A transactional session, or `None` when transactions are unavailable.
    async fn begin(&self) -> QueryResult<Option<Box<dyn Session>>>;
}

/// [`Repository`] over an sqlx `Any` pool.
#[derive(Debug, Clone)]
pub struct SqlRepository {
    pool: AnyPool,
    dialect: Dialect,
    transactions: bool,
}

impl SqlRepository {
    pub fn new(pool: AnyPool, dialect: Dialect) -> Self {
        Self {
            pool,
            dialect,
            transactions: true,
        }
    }

    /// Never hand out transactional sessions.
    pub fn without_transactions(mut self) -> Self {
        self.transactions = false;
        self
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

#[async_trait]
impl Repository for SqlRepository {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn session(&self) -> QueryResult<Box<dyn Session>> {
        Ok(Box::new(SqlSession {
            conn: Connection::Pool(self.pool.clone()),
            dialect: self.dialect,
        }))
    }

    async fn begin(&self) -> QueryResult<Option<Box<dyn Session>>> {
        if !self.transactions {
            return Ok(None);
        }
        let tx = self.pool.begin().await?;
        Ok(Some(Box::new(SqlSession {
            conn: Connection::Transaction(tx),
            dialect: self.dialect,
        })))
    }
}

enum Connection {
    Pool(AnyPool),
    Transaction(Transaction<'static, Any>),
}

struct SqlSession {
    conn: Connection,
    dialect: Dialect,
}

impl SqlSession {
    async fn rows(&mut self, statement: Statement) -> QueryResult<Vec<AnyRow>> {
        let (sql, values) = statement.build(self.dialect);
        tracing::debug!(sql = %sql, params = values.0.len(), "fetching");
        let query = bind_values(sqlx::query(&sql), values)?;
        let rows = match &mut self.conn {
            Connection::Pool(pool) => query.fetch_all(&*pool).await?,
            Connection::Transaction(tx) => query.fetch_all(&mut **tx).await?,
        };
        Ok(rows)
    }
}

#[async_trait]
impl Session for SqlSession {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn is_transactional(&self) -> bool {
        matches!(self.conn, Connection::Transaction(_))
    }

    async fn fetch_all(
        &mut self,
        statement: Statement,
        columns: &[ColumnSpec],
    ) -> QueryResult<Vec<Record>> {
        self.rows(statement)
            .await?
            .iter()
            .map(|row| decode_row(row, columns))
            .collect()
    }

    async fn fetch_count(&mut self, statement: Statement) -> QueryResult<u64> {
        let rows = self.rows(statement).await?;
        let Some(row) = rows.first() else {
            return Ok(0);
        };
        let count: Option<i64> = row.try_get(0)?;
        Ok(count.map_or(0, |n| u64::try_from(n).unwrap_or_default()))
    }

    async fn execute(&mut self, statement: Statement) -> QueryResult<u64> {
        let (sql, values) = statement.build(self.dialect);
        tracing::debug!(sql = %sql, params = values.0.len(), "executing");
        let query = bind_values(sqlx::query(&sql), values)?;
        let result = match &mut self.conn {
            Connection::Pool(pool) => query.execute(&*pool).await?,
            Connection::Transaction(tx) => query.execute(&mut **tx).await?,
        };
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> QueryResult<()> {
        if let Connection::Transaction(tx) = self.conn {
            tx.commit().await?;
        }
        Ok(())
    }
}

type AnyQuery<'q> = sqlx::query::Query<'q, Any, AnyArguments<'q>>;

/// Bind sea-query values in placeholder order.
fn bind_values(mut query: AnyQuery<'_>, values: Values) -> QueryResult<AnyQuery<'_>> {
    for value in values.0 {
        query = match value {
            Value::Bool(v) => query.bind(v),
            Value::TinyInt(v) => query.bind(v.map(i16::from)),
            Value::SmallInt(v) => query.bind(v),
            Value::Int(v) => query.bind(v),
            Value::BigInt(v) => query.bind(v),
            Value::TinyUnsigned(v) => query.bind(v.map(i16::from)),
            Value::SmallUnsigned(v) => query.bind(v.map(i32::from)),
            Value::Unsigned(v) => query.bind(v.map(i64::from)),
            Value::BigUnsigned(v) => {
                let v = v
                    .map(i64::try_from)
                    .transpose()
                    .map_err(|e| QueryError::Build(format!("unsigned value out of range: {e}")))?;
                query.bind(v)
            }
            Value::Float(v) => query.bind(v.map(f64::from)),
            Value::Double(v) => query.bind(v),
            Value::String(v) => query.bind(v.map(|s| *s)),
            Value::Char(v) => query.bind(v.map(|c| c.to_string())),
            Value::Bytes(v) => query.bind(v.map(|b| *b)),
            #[allow(unreachable_patterns)]
            other => {
                return Err(QueryError::Build(format!(
                    "unsupported bind value: {other:?}"
                )));
            }
        };
    }
    Ok(query)
}

fn decode_row(row: &AnyRow, columns: &[ColumnSpec]) -> QueryResult<Record> {
    let mut record = Record::new();
    for (index, spec) in columns.iter().enumerate() {
        record.insert(spec.name.clone(), decode_value(row, index, spec.column_type)?);
    }
    Ok(record)
}

fn decode_value(row: &AnyRow, index: usize, column_type: ColumnType) -> QueryResult<JsonValue> {
    let value = match column_type {
        ColumnType::Integer => row
            .try_get::<Option<i64>, _>(index)?
            .map_or(JsonValue::Null, JsonValue::from),
        ColumnType::Float => match row.try_get::<Option<f64>, _>(index) {
            Ok(v) => v.map_or(JsonValue::Null, JsonValue::from),
            Err(_) => row
                .try_get::<Option<i64>, _>(index)?
                .map_or(JsonValue::Null, |i| JsonValue::from(i as f64)),
        },
        ColumnType::Text => row
            .try_get::<Option<String>, _>(index)?
            .map_or(JsonValue::Null, JsonValue::String),
        // SQLite stores booleans as integers.
        ColumnType::Boolean => match row.try_get::<Option<bool>, _>(index) {
            Ok(v) => v.map_or(JsonValue::Null, JsonValue::Bool),
            Err(_) => row
                .try_get::<Option<i64>, _>(index)?
                .map_or(JsonValue::Null, |i| JsonValue::Bool(i != 0)),
        },
        ColumnType::Json => match row.try_get::<Option<String>, _>(index)? {
            Some(text) => serde_json::from_str(&text).unwrap_or_else(|_| JsonValue::String(text)),
            None => JsonValue::Null,
        },
    };
    Ok(value)
}

/// Render a record value as a SQL expression for `column_type`.
pub(crate) fn column_value(
    column: &str,
    column_type: ColumnType,
    value: &JsonValue,
) -> QueryResult<sea_query::SimpleExpr> {
    use sea_query::{Keyword, SimpleExpr};

    let invalid = || {
        QueryError::InvalidRecord(format!(
            "value {value} does not fit column `{column}` ({column_type:?})"
        ))
    };
    if value.is_null() {
        return Ok(SimpleExpr::Keyword(Keyword::Null));
    }
    let value = match column_type {
        ColumnType::Integer => Value::BigInt(Some(
            value
                .as_i64()
                .or_else(|| value.as_bool().map(i64::from))
                .ok_or_else(invalid)?,
        )),
        ColumnType::Float => Value::Double(Some(value.as_f64().ok_or_else(invalid)?)),
        ColumnType::Text => Value::String(Some(Box::new(
            value.as_str().ok_or_else(invalid)?.to_string(),
        ))),
        ColumnType::Boolean => Value::Bool(Some(
            value
                .as_bool()
                .or_else(|| value.as_i64().map(|i| i != 0))
                .ok_or_else(invalid)?,
        )),
        ColumnType::Json => Value::String(Some(Box::new(serde_json::to_string(value)?))),
    };
    Ok(SimpleExpr::Value(value))
}
