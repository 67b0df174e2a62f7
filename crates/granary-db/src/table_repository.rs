//! Table repository: per-resource tables in PostgreSQL.
//!
//! Each load runs in one transaction: the previous table is dropped, the new
//! one is created from the inferred schema and filled with multi-row
//! `INSERT`s. Nothing is visible to other sessions until commit, so a failed
//! load leaves the previous table (or no table) in place.

use granary_core::error::AppError;
use granary_core::schema::{CellValue, ColumnType, TableSchema};
use granary_core::traits::{TableLoad, TableStore};
use granary_core::{DbConfig, StoreConfig};
use sqlx::postgres::PgPoolOptions;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};

/// Upper bound on bind parameters in one PostgreSQL statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// Opens the connection pool for the relational store.
///
/// # Errors
///
/// Returns `AppError::ConfigError` for an unparsable URL and
/// `AppError::DatabaseError` if the server cannot be reached.
pub async fn connect_pool(store: &StoreConfig, db: &DbConfig) -> Result<PgPool, AppError> {
    let options = store.connect_options()?;
    PgPoolOptions::new()
        .max_connections(db.max_connections)
        .connect_with(options)
        .await
        .map_err(AppError::DatabaseError)
}

/// Quotes an identifier for interpolation into SQL.
///
/// # Examples
///
/// ```
/// use granary_db::quote_identifier;
///
/// assert_eq!(quote_identifier("data_bilancio"), "\"data_bilancio\"");
/// assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
/// ```
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn create_table_sql(schema: &TableSchema) -> String {
    let columns: Vec<String> = schema
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_identifier(&c.name), c.column_type.sql_type()))
        .collect();
    format!(
        "CREATE TABLE {} ({})",
        quote_identifier(&schema.table),
        columns.join(", ")
    )
}

/// Rows per `INSERT` statement for a table of `width` columns.
fn rows_per_statement(width: usize) -> usize {
    (MAX_BIND_PARAMS / width.max(1)).max(1)
}

/// Binds one cell; NULLs are typed after the column so PostgreSQL can plan
/// the statement.
fn push_cell(
    row: &mut Separated<'_, 'static, Postgres, &'static str>,
    cell: &CellValue,
    column_type: ColumnType,
) {
    match cell {
        CellValue::Null => match column_type {
            ColumnType::Boolean => row.push_bind(None::<bool>),
            ColumnType::Integer => row.push_bind(None::<i64>),
            ColumnType::Double => row.push_bind(None::<f64>),
            ColumnType::Date => row.push_bind(None::<chrono::NaiveDate>),
            ColumnType::Timestamp => row.push_bind(None::<chrono::NaiveDateTime>),
            ColumnType::Text => row.push_bind(None::<String>),
        },
        CellValue::Bool(v) => row.push_bind(*v),
        CellValue::Int(v) => row.push_bind(*v),
        CellValue::Float(v) => row.push_bind(*v),
        CellValue::Date(v) => row.push_bind(*v),
        CellValue::Timestamp(v) => row.push_bind(*v),
        CellValue::Text(v) => row.push_bind(v.clone()),
    };
}

/// PostgreSQL-backed [`TableStore`].
///
/// # Examples
///
/// ```no_run
/// use granary_core::{DbConfig, StoreConfig};
/// use granary_db::{TableRepository, connect_pool};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = connect_pool(&StoreConfig::default(), &DbConfig::default()).await?;
/// let repo = TableRepository::new(pool);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TableRepository {
    pool: PgPool,
}

impl TableRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Whether a table with this exact name exists in the search path.
    pub async fn table_exists(&self, table: &str) -> Result<bool, AppError> {
        let exists: (bool,) = sqlx::query_as("SELECT to_regclass(quote_ident($1)) IS NOT NULL")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(exists.0)
    }
}

/// An open table load; dropping it without [`TableLoad::commit`] rolls back.
pub struct PgLoad {
    tx: Transaction<'static, Postgres>,
    schema: TableSchema,
}

impl TableLoad for PgLoad {
    async fn insert_rows(&mut self, rows: &[Vec<CellValue>]) -> Result<u64, AppError> {
        let columns = &self.schema.columns;
        let column_list: Vec<String> = columns.iter().map(|c| quote_identifier(&c.name)).collect();
        let prefix = format!(
            "INSERT INTO {} ({}) ",
            quote_identifier(&self.schema.table),
            column_list.join(", ")
        );

        let mut inserted = 0;
        for chunk in rows.chunks(rows_per_statement(columns.len())) {
            if let Some(bad) = chunk.iter().find(|row| row.len() != columns.len()) {
                return Err(AppError::IngestError(format!(
                    "row has {} cells, table {} has {} columns",
                    bad.len(),
                    self.schema.table,
                    columns.len()
                )));
            }

            let mut builder: QueryBuilder<'static, Postgres> = QueryBuilder::new(prefix.as_str());
            builder.push_values(chunk, |mut row, cells| {
                for (cell, column) in cells.iter().zip(columns) {
                    push_cell(&mut row, cell, column.column_type);
                }
            });

            let result = builder
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(AppError::DatabaseError)?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    async fn commit(self) -> Result<(), AppError> {
        self.tx.commit().await.map_err(AppError::DatabaseError)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

impl TableStore for TableRepository {
    type Load = PgLoad;

    async fn begin(&self, schema: &TableSchema) -> Result<PgLoad, AppError> {
        if schema.columns.is_empty() {
            return Err(AppError::IngestError(format!(
                "table {} has no columns",
                schema.table
            )));
        }

        let mut tx = self.pool.begin().await.map_err(AppError::DatabaseError)?;

        let drop = format!("DROP TABLE IF EXISTS {}", quote_identifier(&schema.table));
        sqlx::query(&drop)
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;

        let create = create_table_sql(schema);
        sqlx::query(&create)
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;

        tracing::debug!(table = schema.table.as_str(), "Table recreated");
        Ok(PgLoad {
            tx,
            schema: schema.clone(),
        })
    }

    async fn row_count(&self, table: &str) -> Result<Option<u64>, AppError> {
        if !self.table_exists(table).await? {
            return Ok(None);
        }

        let query = format!("SELECT COUNT(*) FROM {}", quote_identifier(table));
        let count: (i64,) = sqlx::query_as(&query)
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(Some(count.0.max(0) as u64))
    }
}
