//! One ETL run: read sources, stage, build dimensions and facts, then resolve
//! and load into the warehouse. Stages run strictly in sequence.

use anyhow::Result;
use opinion_core::{
    assemble_facts, build_dimensions, normalize, resolve_facts, standardize_columns, Dimensions,
    FactRecord, FactTable, NormalizedRecordSet, RawRecordSet,
};
use sqlx::{PgPool, SqlitePool};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{Environment, Settings};
use crate::{extract, loader, staging, warehouse};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after staging; the warehouse is not touched
    pub dry_run: bool,
}

/// The dimensions and fact table written to staging by one run
#[derive(Debug)]
pub struct StagedRun {
    pub dimensions: Dimensions,
    pub facts: FactTable,
}

#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// `(source, rows read)` for every source that could be read
    pub sources: Vec<(String, usize)>,
    pub fact_rows: usize,
    /// `None` on a dry run
    pub loaded: Option<u64>,
}

fn keep_available(source: &str, result: opinion_core::Result<RawRecordSet>) -> Option<RawRecordSet> {
    match result {
        Ok(set) => {
            let set = standardize_columns(set);
            info!(source, rows = set.len(), "source read");
            Some(set)
        }
        Err(e) => {
            warn!(source, error = %e, "source unavailable; continuing without it");
            None
        }
    }
}

/// Read the relational source, the REST endpoint and every configured file.
/// Unavailable sources are logged and left out.
pub async fn read_sources(settings: &Settings, env: &Environment) -> Vec<RawRecordSet> {
    let mut sets = Vec::new();

    info!("querying relational opinions source");
    sets.extend(keep_available(
        extract::DB_SOURCE,
        extract::extract_database(env.source_db_url.as_deref(), &settings.source_query).await,
    ));

    info!(url = %settings.api_url, "querying opinions API");
    sets.extend(keep_available(
        extract::API_SOURCE,
        extract::extract_api(&settings.api_url, env.api_timeout).await,
    ));

    for file in settings.file_sources() {
        info!(key = %file.key, path = %file.path.display(), "reading file source");
        sets.extend(keep_available(&file.name, extract::extract_csv(&file).await));
    }

    sets
}

fn normalize_all(raw_sets: &[RawRecordSet]) -> Vec<NormalizedRecordSet> {
    raw_sets
        .iter()
        .filter_map(|set| match normalize(set) {
            Ok(normalized) => Some(normalized),
            Err(e) => {
                warn!(source = %set.source, error = %e, "source left out of this run");
                None
            }
        })
        .collect()
}

/// Stage raw sets, dimensions and facts. Every staging table is replaced.
pub async fn stage_and_assemble(
    staging_pool: &SqlitePool,
    raw_sets: &[RawRecordSet],
) -> Result<StagedRun> {
    for set in raw_sets {
        if set.is_empty() {
            info!(source = %set.source, "no rows; staging table left untouched");
            continue;
        }
        if set.columns.is_empty() {
            warn!(source = %set.source, rows = set.len(), "rows without columns; raw set not staged");
            continue;
        }
        let table = staging::raw_table(set);
        match staging::replace_table(staging_pool, &table).await {
            Ok(()) => info!(table = %table.name, rows = table.rows.len(), "raw set staged"),
            Err(e) => warn!(table = %table.name, error = %format!("{:#}", e), "raw set could not be staged"),
        }
    }

    let normalized = normalize_all(raw_sets);

    let dimensions = build_dimensions(&normalized);
    staging::replace_table(staging_pool, &staging::customer_table(&dimensions.customers)).await?;
    staging::replace_table(staging_pool, &staging::product_table(&dimensions.products)).await?;
    staging::replace_table(staging_pool, &staging::source_table(&dimensions.sources)).await?;
    staging::replace_table(staging_pool, &staging::date_table(&dimensions.dates)).await?;

    let facts = assemble_facts(&normalized, &dimensions.sources);
    staging::replace_table(staging_pool, &staging::fact_table(&facts.rows)).await?;

    staging::ensure_indexes(staging_pool).await?;

    Ok(StagedRun { dimensions, facts })
}

async fn resolve_and_load(pool: &PgPool, facts: &[FactRecord]) -> Result<u64> {
    let snapshot = warehouse::read_snapshot(pool).await?;
    info!(
        max_customer_id = snapshot.max_customer_id(),
        max_product_id = snapshot.max_product_id(),
        source_id = snapshot.default_source_id(),
        default_date_id = snapshot.default_date_id(),
        "warehouse snapshot read"
    );
    let resolved = resolve_facts(facts, &snapshot);
    loader::load_facts(pool, &resolved).await
}

/// Resolve staged facts against the warehouse and load them in one batch
pub async fn load_to_warehouse(env: &Environment, facts: &[FactRecord]) -> Result<u64> {
    if facts.is_empty() {
        info!("fact table is empty; nothing to load");
        return Ok(0);
    }

    let pool = warehouse::connect(env.warehouse_url()?).await?;
    let result = resolve_and_load(&pool, facts).await;
    pool.close().await;
    result
}

async fn run_stages(
    run_id: Uuid,
    settings: &Settings,
    env: &Environment,
    options: RunOptions,
) -> Result<RunSummary> {
    let raw_sets = read_sources(settings, env).await;

    let staging_pool = staging::connect(&settings.staging_db).await?;
    let staged = stage_and_assemble(&staging_pool, &raw_sets).await;
    staging_pool.close().await;
    let staged = staged?;

    let loaded = if options.dry_run {
        info!("dry run; warehouse load skipped");
        None
    } else {
        Some(load_to_warehouse(env, &staged.facts.rows).await?)
    };

    let summary = RunSummary {
        run_id,
        sources: raw_sets.iter().map(|s| (s.source.clone(), s.len())).collect(),
        fact_rows: staged.facts.len(),
        loaded,
    };
    info!(
        sources = summary.sources.len(),
        customers = staged.dimensions.customers.len(),
        products = staged.dimensions.products.len(),
        source_members = staged.dimensions.sources.len(),
        dates = staged.dimensions.dates.len(),
        fact_rows = summary.fact_rows,
        skipped_blocks = staged.facts.skipped.len(),
        loaded = ?summary.loaded,
        "run finished"
    );
    Ok(summary)
}

pub async fn run(settings: &Settings, env: &Environment, options: RunOptions) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    run_stages(run_id, settings, env, options)
        .instrument(info_span!("etl_run", %run_id))
        .await
}

async fn load_staged_facts(settings: &Settings, env: &Environment) -> Result<u64> {
    let staging_pool = staging::connect(&settings.staging_db).await?;
    let facts = staging::read_fact_table(&staging_pool).await;
    staging_pool.close().await;
    let facts = facts?;
    info!(rows = facts.len(), "staged facts read");
    load_to_warehouse(env, &facts).await
}

/// Load whatever `fact_staging` currently holds
pub async fn load_staged(settings: &Settings, env: &Environment) -> Result<u64> {
    let run_id = Uuid::new_v4();
    load_staged_facts(settings, env)
        .instrument(info_span!("etl_load", %run_id))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::tests::memory_pool;
    use opinion_core::RawValue;

    fn text(value: &str) -> RawValue {
        RawValue::Text(value.to_string())
    }

    fn raw(source: &str, columns: &[&str], rows: Vec<Vec<RawValue>>) -> RawRecordSet {
        let mut set = RawRecordSet::new(source, columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            set.push_row(row);
        }
        set
    }

    fn sample_sets() -> Vec<RawRecordSet> {
        vec![
            raw(
                "clients",
                &["idcliente", "nombre", "email"],
                vec![vec![text("1"), text("Ana"), text("ana@example.com")]],
            ),
            raw(
                "products",
                &["idproducto", "nombre", "categoría"],
                vec![vec![text("5"), text("Mouse"), text("Accesorios")]],
            ),
            raw(
                "fuente",
                &["idfuente", "tipofuente", "fechacarga"],
                vec![vec![text("1"), text("Web"), text("2024-01-01")]],
            ),
            raw(
                "web_reviews",
                &["idcliente", "idproducto", "fecha", "comentario", "rating", "fuente"],
                vec![
                    vec![text("1"), text("5"), text("2024-02-03"), text("ok"), text("4"), text("Web")],
                    vec![text("2"), text("5"), text("2024-02-04"), text("meh"), text("2"), text("Otra")],
                ],
            ),
            raw("social_comments", &["unrelated"], vec![vec![text("x")]]),
        ]
    }

    async fn count(pool: &SqlitePool, table: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool)
            .await
            .unwrap();
        n
    }

    #[tokio::test]
    async fn test_stage_and_assemble() {
        let pool = memory_pool().await;
        let staged = stage_and_assemble(&pool, &sample_sets()).await.unwrap();

        assert_eq!(staged.dimensions.customers.len(), 1);
        assert_eq!(staged.dimensions.dates.len(), 2);
        assert_eq!(staged.facts.len(), 2);

        assert_eq!(count(&pool, "stg_clients").await, 1);
        assert_eq!(count(&pool, "stg_web_reviews").await, 2);
        // staged raw even though its shape is unusable
        assert_eq!(count(&pool, "stg_social_comments").await, 1);
        assert_eq!(count(&pool, "dim_producto").await, 1);
        assert_eq!(count(&pool, "dim_fecha").await, 2);
        assert_eq!(count(&pool, "fact_staging").await, 2);

        let facts = staging::read_fact_table(&pool).await.unwrap();
        assert_eq!(facts[0].source_key, "1");
        assert_eq!(facts[1].source_key, "-1");
    }

    #[tokio::test]
    async fn test_rerun_replaces_staging() {
        let pool = memory_pool().await;
        stage_and_assemble(&pool, &sample_sets()).await.unwrap();
        stage_and_assemble(&pool, &sample_sets()).await.unwrap();
        assert_eq!(count(&pool, "fact_staging").await, 2);
        assert_eq!(count(&pool, "dim_cliente").await, 1);
    }

    #[tokio::test]
    async fn test_all_sources_empty() {
        let pool = memory_pool().await;
        let sets = vec![
            RawRecordSet::new(extract::DB_SOURCE, vec![]),
            RawRecordSet::new(extract::API_SOURCE, vec![]),
            raw("surveys", &["fecha", "comentario"], vec![]),
        ];
        let staged = stage_and_assemble(&pool, &sets).await.unwrap();

        assert!(staged.facts.is_empty());
        assert_eq!(count(&pool, "fact_staging").await, 0);
        assert!(!staging::table_exists(&pool, "stg_surveys").await.unwrap());
    }

    #[tokio::test]
    async fn test_column_less_source_does_not_abort_run() {
        let pool = memory_pool().await;
        let mut sets = sample_sets();
        sets.push(extract::records_from_json(
            extract::API_SOURCE,
            serde_json::json!([{}, {}]),
        ));
        let staged = stage_and_assemble(&pool, &sets).await.unwrap();

        assert_eq!(staged.facts.len(), 2);
        assert_eq!(count(&pool, "fact_staging").await, 2);
        assert!(!staging::table_exists(&pool, "stg_api_opiniones").await.unwrap());
    }

    #[tokio::test]
    async fn test_load_empty_facts_needs_no_warehouse() {
        let env = Environment {
            warehouse_url: None,
            source_db_url: None,
            api_timeout: std::time::Duration::from_secs(1),
        };
        assert_eq!(load_to_warehouse(&env, &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_load_without_warehouse_url_fails() {
        let env = Environment {
            warehouse_url: None,
            source_db_url: None,
            api_timeout: std::time::Duration::from_secs(1),
        };
        let facts = vec![FactRecord {
            customer_key: "1".to_string(),
            product_key: "1".to_string(),
            source_key: "-1".to_string(),
            date_key: -1,
            score: 0.0,
            comment: String::new(),
        }];
        assert!(load_to_warehouse(&env, &facts).await.is_err());
    }
}
