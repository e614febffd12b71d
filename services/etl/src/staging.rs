//! SQLite staging store
//!
//! Every table is replaced wholesale: dropped, recreated and filled inside one
//! transaction. Raw sets stage as `stg_<source>` with all-TEXT columns; the
//! dimension and fact tables have fixed shapes.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use opinion_core::model::{NormalizedRecordSet, RawRecordSet, RawValue};
use opinion_core::{normalize, CustomerDim, DateDim, FactRecord, ProductDim, SourceDim};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

/// Stays under SQLite's default limit of 32766 host parameters per statement
const SQLITE_BIND_LIMIT: usize = 32_000;

pub const CUSTOMER_TABLE: &str = "dim_cliente";
pub const PRODUCT_TABLE: &str = "dim_producto";
pub const SOURCE_TABLE: &str = "dim_fuente";
pub const DATE_TABLE: &str = "dim_fecha";
pub const FACT_TABLE: &str = "fact_staging";

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS ix_dim_cliente_id ON dim_cliente(cliente_id)",
    "CREATE INDEX IF NOT EXISTS ix_dim_producto_id ON dim_producto(producto_id)",
    "CREATE INDEX IF NOT EXISTS ix_dim_fuente_id ON dim_fuente(fuente_id)",
    "CREATE INDEX IF NOT EXISTS ix_dim_fecha_key ON dim_fecha(fecha_key)",
    "CREATE INDEX IF NOT EXISTS ix_fact_fecha_key ON fact_staging(fecha_key)",
];

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Open (creating if needed) the staging database file
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create staging directory {}", parent.display()))?;
    }
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open staging database {}", path.display()))
}

/// `stg_` + source name
pub fn staging_table_name(source: &str) -> String {
    format!("stg_{}", source)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// =============================================================================
// Table shapes
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum StagingValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl From<Option<String>> for StagingValue {
    fn from(value: Option<String>) -> Self {
        value.map(StagingValue::Text).unwrap_or(StagingValue::Null)
    }
}

/// A table ready to be written: column names with SQLite types, and rows
#[derive(Debug, Clone)]
pub struct StagingTable {
    pub name: String,
    pub columns: Vec<(String, &'static str)>,
    pub rows: Vec<Vec<StagingValue>>,
}

impl StagingTable {
    fn new(name: &str, columns: &[(&str, &'static str)]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|(column, sql_type)| (column.to_string(), *sql_type))
                .collect(),
            rows: Vec::new(),
        }
    }
}

fn raw_cell(value: &RawValue) -> StagingValue {
    match value {
        RawValue::Null => StagingValue::Null,
        RawValue::Text(s) => StagingValue::Text(s.clone()),
        other => other.to_text().into(),
    }
}

pub fn raw_table(set: &RawRecordSet) -> StagingTable {
    StagingTable {
        name: staging_table_name(&set.source),
        columns: set.columns.iter().map(|c| (c.clone(), "TEXT")).collect(),
        rows: set
            .rows
            .iter()
            .map(|row| row.iter().map(raw_cell).collect())
            .collect(),
    }
}

pub fn customer_table(rows: &[CustomerDim]) -> StagingTable {
    let mut table = StagingTable::new(
        CUSTOMER_TABLE,
        &[("cliente_id", "TEXT"), ("nombre", "TEXT"), ("email", "TEXT")],
    );
    table.rows = rows
        .iter()
        .map(|row| {
            vec![
                StagingValue::Text(row.key.clone()),
                row.name.clone().into(),
                row.email.clone().into(),
            ]
        })
        .collect();
    table
}

pub fn product_table(rows: &[ProductDim]) -> StagingTable {
    let mut table = StagingTable::new(
        PRODUCT_TABLE,
        &[("producto_id", "TEXT"), ("nombre", "TEXT"), ("categoria", "TEXT")],
    );
    table.rows = rows
        .iter()
        .map(|row| {
            vec![
                StagingValue::Text(row.key.clone()),
                row.name.clone().into(),
                row.category.clone().into(),
            ]
        })
        .collect();
    table
}

pub fn source_table(rows: &[SourceDim]) -> StagingTable {
    let mut table = StagingTable::new(
        SOURCE_TABLE,
        &[
            ("fuente_id", "INTEGER"),
            ("nombre", "TEXT"),
            ("tipo_fuente", "TEXT"),
            ("fecha_carga", "TEXT"),
        ],
    );
    table.rows = rows
        .iter()
        .map(|row| {
            vec![
                StagingValue::Int(row.id),
                row.name.clone().into(),
                row.source_type.clone().into(),
                row.loaded_at
                    .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
                    .into(),
            ]
        })
        .collect();
    table
}

pub fn date_table(rows: &[DateDim]) -> StagingTable {
    let mut table = StagingTable::new(
        DATE_TABLE,
        &[
            ("fecha_key", "INTEGER"),
            ("fecha", "TEXT"),
            ("anio", "INTEGER"),
            ("mes", "INTEGER"),
            ("dia", "INTEGER"),
            ("trimestre", "INTEGER"),
            ("mes_nombre", "TEXT"),
            ("dia_semana", "TEXT"),
        ],
    );
    table.rows = rows
        .iter()
        .map(|row| {
            vec![
                StagingValue::Int(row.key),
                StagingValue::Text(row.date.format(DATE_FORMAT).to_string()),
                StagingValue::Int(i64::from(row.year)),
                StagingValue::Int(i64::from(row.month)),
                StagingValue::Int(i64::from(row.day)),
                StagingValue::Int(i64::from(row.quarter)),
                StagingValue::Text(row.month_name.clone()),
                StagingValue::Text(row.weekday_name.clone()),
            ]
        })
        .collect();
    table
}

pub fn fact_table(rows: &[FactRecord]) -> StagingTable {
    let mut table = StagingTable::new(
        FACT_TABLE,
        &[
            ("cliente_id", "TEXT"),
            ("producto_id", "TEXT"),
            ("fuente_id", "TEXT"),
            ("fecha_key", "INTEGER"),
            ("puntaje", "REAL"),
            ("texto_opinion", "TEXT"),
        ],
    );
    table.rows = rows
        .iter()
        .map(|row| {
            vec![
                StagingValue::Text(row.customer_key.clone()),
                StagingValue::Text(row.product_key.clone()),
                StagingValue::Text(row.source_key.clone()),
                StagingValue::Int(row.date_key),
                StagingValue::Real(row.score),
                StagingValue::Text(row.comment.clone()),
            ]
        })
        .collect();
    table
}

// =============================================================================
// Writes
// =============================================================================

/// Drop, recreate and fill a table in one transaction
pub async fn replace_table(pool: &SqlitePool, table: &StagingTable) -> Result<()> {
    let name = quote_ident(&table.name);
    let column_defs = table
        .columns
        .iter()
        .map(|(column, sql_type)| format!("{} {}", quote_ident(column), sql_type))
        .collect::<Vec<_>>()
        .join(", ");
    let column_list = table
        .columns
        .iter()
        .map(|(column, _)| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ");

    let mut tx = pool.begin().await?;

    sqlx::query(&format!("DROP TABLE IF EXISTS {}", name))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&format!("CREATE TABLE {} ({})", name, column_defs))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to create staging table {}", table.name))?;

    if !table.columns.is_empty() {
        let chunk_size = (SQLITE_BIND_LIMIT / table.columns.len()).max(1);
        for chunk in table.rows.chunks(chunk_size) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", name, column_list));
            builder.push_values(chunk, |mut b, row| {
                for value in row {
                    match value {
                        StagingValue::Null => {
                            b.push_bind(None::<String>);
                        }
                        StagingValue::Int(i) => {
                            b.push_bind(*i);
                        }
                        StagingValue::Real(f) => {
                            b.push_bind(*f);
                        }
                        StagingValue::Text(s) => {
                            b.push_bind(s.clone());
                        }
                    }
                }
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to insert into staging table {}", table.name))?;
        }
    }

    tx.commit().await?;
    debug!(table = %table.name, rows = table.rows.len(), "staging table replaced");
    Ok(())
}

pub async fn ensure_indexes(pool: &SqlitePool) -> Result<()> {
    for statement in INDEXES {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to run: {}", statement))?;
    }
    info!(indexes = INDEXES.len(), "staging indexes ensured");
    Ok(())
}

// =============================================================================
// Reads
// =============================================================================

pub async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let found: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .bind(table)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

/// Read a staged raw table back as the raw set of `source`
pub async fn read_raw_table(pool: &SqlitePool, source: &str) -> Result<RawRecordSet> {
    let table = staging_table_name(source);
    if !table_exists(pool, &table).await? {
        anyhow::bail!("staging table {} does not exist", table);
    }

    let columns: Vec<(String,)> =
        sqlx::query_as("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .bind(&table)
            .fetch_all(pool)
            .await?;
    let columns: Vec<String> = columns.into_iter().map(|(name,)| name).collect();

    let rows = sqlx::query(&format!("SELECT * FROM {}", quote_ident(&table)))
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to read {}", table))?;

    let mut set = RawRecordSet::new(source, columns);
    for row in &rows {
        let mut cells = Vec::with_capacity(set.columns.len());
        for idx in 0..set.columns.len() {
            let value: Option<String> = sqlx::Row::try_get(row, idx)?;
            cells.push(value.map(RawValue::Text).unwrap_or(RawValue::Null));
        }
        set.push_row(cells);
    }
    Ok(set)
}

/// Read a staged raw table and normalize it
pub async fn read_normalized(pool: &SqlitePool, source: &str) -> Result<NormalizedRecordSet> {
    let raw = read_raw_table(pool, source).await?;
    Ok(normalize(&raw)?)
}

pub async fn read_date_dimension(pool: &SqlitePool) -> Result<Vec<DateDim>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT fecha FROM dim_fecha ORDER BY fecha_key")
        .fetch_all(pool)
        .await
        .context("Failed to read dim_fecha")?;

    rows.into_iter()
        .map(|(fecha,)| {
            NaiveDate::parse_from_str(&fecha, DATE_FORMAT)
                .map(DateDim::from_date)
                .with_context(|| format!("Invalid date in dim_fecha: {}", fecha))
        })
        .collect()
}

pub async fn read_fact_table(pool: &SqlitePool) -> Result<Vec<FactRecord>> {
    let rows: Vec<(String, String, String, i64, f64, String)> = sqlx::query_as(
        r#"
        SELECT cliente_id, producto_id, fuente_id, fecha_key, puntaje, texto_opinion
        FROM fact_staging
        "#,
    )
    .fetch_all(pool)
    .await
    .context("Failed to read fact_staging")?;

    Ok(rows
        .into_iter()
        .map(
            |(customer_key, product_key, source_key, date_key, score, comment)| FactRecord {
                customer_key,
                product_key,
                source_key,
                date_key,
                score,
                comment,
            },
        )
        .collect())
}

// =============================================================================
// TESTS
// =============================================================================
