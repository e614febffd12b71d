//! Dimension sync: appends the staged customers, products, sources and dates
//! to the warehouse dimensions so the resolver has identifier ranges to map
//! onto. Each dimension is synced independently.

use anyhow::{Context, Result};
use opinion_core::dimensions::{
    build_customer_dimension, build_product_dimension, build_source_dimension,
};
use opinion_core::{CustomerDim, ProductDim, SourceDim};
use sqlx::{PgPool, SqlitePool};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{Environment, Settings};
use crate::{staging, warehouse};

const CUSTOMER_SOURCE: &str = "clients";
const PRODUCT_SOURCE: &str = "products";
const SOURCE_CATALOGUE: &str = "fuente";

/// Rows appended per dimension; `None` when that dimension failed
#[derive(Debug, Default, PartialEq)]
pub struct SyncSummary {
    pub customers: Option<u64>,
    pub products: Option<u64>,
    pub sources: Option<u64>,
    pub dates: Option<u64>,
}

impl SyncSummary {
    pub fn failures(&self) -> usize {
        [self.customers, self.products, self.sources, self.dates]
            .iter()
            .filter(|n| n.is_none())
            .count()
    }
}

/// Staged customers ordered by source id, deduplicated
pub async fn staged_customers(staging: &SqlitePool) -> Result<Vec<CustomerDim>> {
    let set = staging::read_normalized(staging, CUSTOMER_SOURCE).await?;
    let mut records = set
        .customers()
        .context("stg_clients is not a customer set")?
        .to_vec();
    records.sort_by_key(|r| r.id);
    Ok(build_customer_dimension(Some(records.as_slice()))?)
}

pub async fn staged_products(staging: &SqlitePool) -> Result<Vec<ProductDim>> {
    let set = staging::read_normalized(staging, PRODUCT_SOURCE).await?;
    let mut records = set
        .products()
        .context("stg_products is not a product set")?
        .to_vec();
    records.sort_by_key(|r| r.id);
    Ok(build_product_dimension(Some(records.as_slice()))?)
}

pub async fn staged_sources(staging: &SqlitePool) -> Result<Vec<SourceDim>> {
    let set = staging::read_normalized(staging, SOURCE_CATALOGUE).await?;
    let mut records = set
        .sources()
        .context("stg_fuente is not a source catalogue")?
        .to_vec();
    records.sort_by_key(|r| r.id);
    Ok(build_source_dimension(Some(records.as_slice()))?)
}

fn isolate(dimension: &str, result: Result<u64>) -> Option<u64> {
    match result {
        Ok(rows) => Some(rows),
        Err(e) => {
            warn!(dimension, error = %format!("{:#}", e), "dimension sync failed");
            None
        }
    }
}

async fn sync_customers(staging: &SqlitePool, warehouse: &PgPool) -> Result<u64> {
    let rows = staged_customers(staging).await?;
    warehouse::append_customers(warehouse, &rows).await
}

async fn sync_products(staging: &SqlitePool, warehouse: &PgPool) -> Result<u64> {
    let rows = staged_products(staging).await?;
    warehouse::append_products(warehouse, &rows).await
}

async fn sync_sources(staging: &SqlitePool, warehouse: &PgPool) -> Result<u64> {
    let rows = staged_sources(staging).await?;
    warehouse::append_sources(warehouse, &rows).await
}

async fn sync_dates(staging: &SqlitePool, warehouse: &PgPool) -> Result<u64> {
    let rows = staging::read_date_dimension(staging).await?;
    warehouse::append_dates(warehouse, &rows).await
}

pub async fn sync_dimensions(staging: &SqlitePool, warehouse: &PgPool) -> SyncSummary {
    SyncSummary {
        customers: isolate("customer", sync_customers(staging, warehouse).await),
        products: isolate("product", sync_products(staging, warehouse).await),
        sources: isolate("source", sync_sources(staging, warehouse).await),
        dates: isolate("date", sync_dates(staging, warehouse).await),
    }
}

async fn sync_with_stores(settings: &Settings, env: &Environment) -> Result<SyncSummary> {
    let warehouse_url = env.warehouse_url()?;
    let staging_pool = staging::connect(&settings.staging_db).await?;
    let warehouse_pool = match warehouse::connect(warehouse_url).await {
        Ok(pool) => pool,
        Err(e) => {
            staging_pool.close().await;
            return Err(e);
        }
    };

    let summary = sync_dimensions(&staging_pool, &warehouse_pool).await;

    warehouse_pool.close().await;
    staging_pool.close().await;

    info!(
        customers = ?summary.customers,
        products = ?summary.products,
        sources = ?summary.sources,
        dates = ?summary.dates,
        "dimension sync finished"
    );
    Ok(summary)
}

/// Open both stores, sync every dimension, and close the stores again
pub async fn run_sync(settings: &Settings, env: &Environment) -> Result<SyncSummary> {
    let span = info_span!("dimension_sync", run_id = %Uuid::new_v4());
    sync_with_stores(settings, env).instrument(span).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::tests::memory_pool;
    use crate::staging::{raw_table, replace_table};
    use opinion_core::{RawRecordSet, RawValue};

    fn text(value: &str) -> RawValue {
        RawValue::Text(value.to_string())
    }

    async fn stage(pool: &SqlitePool, source: &str, columns: &[&str], rows: Vec<Vec<RawValue>>) {
        let mut set = RawRecordSet::new(source, columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            set.push_row(row);
        }
        replace_table(pool, &raw_table(&set)).await.unwrap();
    }

    #[tokio::test]
    async fn test_staged_customers_sorted_by_id() {
        let pool = memory_pool().await;
        stage(
            &pool,
            "clients",
            &["idcliente", "nombre", "email"],
            vec![
                vec![text("10"), text("Zoe"), text("z@example.com")],
                vec![text("2"), text("Ana"), text("a@example.com")],
                vec![text("2"), text("Ana dup"), text("d@example.com")],
            ],
        )
        .await;

        let customers = staged_customers(&pool).await.unwrap();
        let keys: Vec<&str> = customers.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["C002", "C010"]);
        assert_eq!(customers[0].name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn test_staged_sources_use_type_label() {
        let pool = memory_pool().await;
        stage(
            &pool,
            "fuente",
            &["idfuente", "tipofuente", "fechacarga"],
            vec![
                vec![text("2"), text("Encuesta"), text("2024-03-01 10:00:00")],
                vec![text("1"), text("Web"), text("no es fecha")],
            ],
        )
        .await;

        let sources = staged_sources(&pool).await.unwrap();
        assert_eq!(sources[0].id, 1);
        assert_eq!(sources[0].name.as_deref(), Some("Web"));
        assert_eq!(sources[0].loaded_at, None);
        assert!(sources[1].loaded_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_staged_products_fail() {
        let pool = memory_pool().await;
        assert!(staged_products(&pool).await.is_err());
    }

    #[test]
    fn test_failures_counted() {
        let summary = SyncSummary {
            customers: Some(3),
            products: None,
            sources: Some(0),
            dates: None,
        };
        assert_eq!(summary.failures(), 2);
    }
}
