//! Warehouse access: identifier snapshots, dimension appends and the opinion
//! report. Facts are written by the loader.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use opinion_core::{CustomerDim, DateDim, ProductDim, SourceDim, WarehouseDate, WarehouseSnapshot};
use sqlx::postgres::PgPoolOptions;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

/// Postgres accepts at most 65535 bind parameters per statement
const PG_BIND_LIMIT: usize = 65_535;

pub async fn connect(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await
        .context("Failed to connect to warehouse")
}

/// Rows per multi-row INSERT so one statement stays under the bind limit
pub fn rows_per_statement(columns: usize) -> usize {
    (PG_BIND_LIMIT / columns.max(1)).max(1)
}

// =============================================================================
// Snapshot
// =============================================================================

async fn fetch_ids(pool: &PgPool, sql: &str) -> Result<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as(sql)
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to run: {}", sql))?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Read the identifier ranges of all four dimensions
pub async fn read_snapshot(pool: &PgPool) -> Result<WarehouseSnapshot> {
    let customers = fetch_ids(pool, r#"SELECT "Id"::bigint FROM "Dimension"."Customer""#).await?;
    let products = fetch_ids(pool, r#"SELECT "Id"::bigint FROM "Dimension"."Product""#).await?;
    let sources = fetch_ids(pool, r#"SELECT "Id"::bigint FROM "Dimension"."Source""#).await?;

    let dates: Vec<(i64, Option<NaiveDate>)> =
        sqlx::query_as(r#"SELECT "Id"::bigint, "Date"::date FROM "Dimension"."Date""#)
            .fetch_all(pool)
            .await
            .context("Failed to read Dimension.Date")?;
    let dates: Vec<WarehouseDate> = dates
        .into_iter()
        .map(|(id, date)| WarehouseDate { id, date })
        .collect();

    debug!(
        customers = customers.len(),
        products = products.len(),
        sources = sources.len(),
        dates = dates.len(),
        "warehouse snapshot read"
    );

    Ok(WarehouseSnapshot::new(&customers, &products, &sources, &dates)?)
}

// =============================================================================
// Appends
// =============================================================================

/// Multi-row insert of `rows` in one transaction, chunked under the bind limit
pub(crate) async fn append_rows<'a, T, F>(
    pool: &PgPool,
    insert: &str,
    columns: usize,
    rows: &'a [T],
    mut push_row: F,
) -> Result<u64>
where
    F: FnMut(Separated<'_, 'a, Postgres, &'static str>, &'a T),
{
    if rows.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for chunk in rows.chunks(rows_per_statement(columns)) {
        let mut builder: QueryBuilder<'a, Postgres> = QueryBuilder::new(insert);
        builder.push_values(chunk, |b, row| push_row(b, row));
        inserted += builder
            .build()
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to run: {}", insert))?
            .rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

pub async fn append_customers(pool: &PgPool, rows: &[CustomerDim]) -> Result<u64> {
    let inserted = append_rows(
        pool,
        r#"INSERT INTO "Dimension"."Customer" ("Name", "Email", "Age", "Country") "#,
        4,
        rows,
        |mut b, row| {
            b.push_bind(row.name.as_deref())
                .push_bind(row.email.as_deref())
                .push("NULL")
                .push("NULL");
        },
    )
    .await?;
    info!(rows = inserted, "Dimension.Customer appended");
    Ok(inserted)
}

pub async fn append_products(pool: &PgPool, rows: &[ProductDim]) -> Result<u64> {
    let inserted = append_rows(
        pool,
        r#"INSERT INTO "Dimension"."Product" ("Name", "Category", "Brand") "#,
        3,
        rows,
        |mut b, row| {
            b.push_bind(row.name.as_deref())
                .push_bind(row.category.as_deref())
                .push("NULL");
        },
    )
    .await?;
    info!(rows = inserted, "Dimension.Product appended");
    Ok(inserted)
}

/// `Name` and `Type` both carry the source type label
pub async fn append_sources(pool: &PgPool, rows: &[SourceDim]) -> Result<u64> {
    let inserted = append_rows(
        pool,
        r#"INSERT INTO "Dimension"."Source" ("Name", "Type", "LoadDate") "#,
        3,
        rows,
        |mut b, row| {
            b.push_bind(row.source_type.as_deref())
                .push_bind(row.source_type.as_deref())
                .push_bind(row.loaded_at);
        },
    )
    .await?;
    info!(rows = inserted, "Dimension.Source appended");
    Ok(inserted)
}

pub async fn append_dates(pool: &PgPool, rows: &[DateDim]) -> Result<u64> {
    let inserted = append_rows(
        pool,
        r#"INSERT INTO "Dimension"."Date" ("Date", "Year", "Month", "Day") "#,
        4,
        rows,
        |mut b, row| {
            b.push_bind(row.date)
                .push_bind(row.year)
                .push_bind(row.month as i32)
                .push_bind(row.day as i32);
        },
    )
    .await?;
    info!(rows = inserted, "Dimension.Date appended");
    Ok(inserted)
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
pub struct OpinionReportRow {
    pub customer: Option<String>,
    pub product: Option<String>,
    pub source_type: Option<String>,
    pub date: Option<NaiveDate>,
    pub score: Option<i32>,
    pub sentiment: Option<String>,
    pub comment: Option<String>,
}

pub async fn fetch_report(pool: &PgPool, limit: i64) -> Result<Vec<OpinionReportRow>> {
    let rows = sqlx::query_as::<_, OpinionReportRow>(
        r#"
        SELECT c."Name" AS customer,
               p."Name" AS product,
               s."Type" AS source_type,
               d."Date"::date AS date,
               o."Score"::int AS score,
               o."Sentiment" AS sentiment,
               o."Comment" AS comment
        FROM "Fact"."Opinion" o
        JOIN "Dimension"."Customer" c ON c."Id" = o."CustomerId"
        JOIN "Dimension"."Product" p ON p."Id" = o."ProductId"
        JOIN "Dimension"."Source" s ON s."Id" = o."SourceId"
        JOIN "Dimension"."Date" d ON d."Id" = o."DateId"
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to query opinion report")?;

    Ok(rows)
}
