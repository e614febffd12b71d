//! Loader: resolved facts into `Fact.Opinion` as one atomic batch

use anyhow::Result;
use opinion_core::ResolvedFactRecord;
use sqlx::PgPool;
use tracing::info;

use crate::warehouse::append_rows;

const INSERT_OPINION: &str = r#"INSERT INTO "Fact"."Opinion" ("ProductId", "CustomerId", "SourceId", "DateId", "Score", "Sentiment", "Comment") "#;

/// Insert every row or none. Empty input is a no-op and touches no connection.
pub async fn load_facts(pool: &PgPool, rows: &[ResolvedFactRecord]) -> Result<u64> {
    if rows.is_empty() {
        info!("no fact rows to load");
        return Ok(0);
    }

    let inserted = append_rows(pool, INSERT_OPINION, 7, rows, |mut b, row| {
        b.push_bind(row.product_id)
            .push_bind(row.customer_id)
            .push_bind(row.source_id)
            .push_bind(row.date_id)
            .push_bind(row.score)
            .push_bind(row.sentiment.as_str())
            .push_bind(row.comment.as_str());
    })
    .await?;

    info!(rows = inserted, "Fact.Opinion loaded");
    Ok(inserted)
}
