//! Fact Assembler
//!
//! Turns each opinion set into a fact block of canonical rows and unions the
//! blocks into the staging fact table. A block that cannot be produced is
//! logged and skipped; the other blocks still contribute.

use tracing::{info, warn};

use crate::dimensions::{date_key, SourceDim};
use crate::error::EtlError;
use crate::model::{
    NormalizedRecordSet, OpinionRecord, SourceKind, COMMENT_MAX_CHARS, MISSING_DATE_KEY,
    MISSING_KEY,
};

/// One opinion event in canonical form. Every field is always populated.
#[derive(Debug, Clone, PartialEq)]
pub struct FactRecord {
    pub customer_key: String,
    pub product_key: String,
    pub source_key: String,
    pub date_key: i64,
    pub score: f64,
    pub comment: String,
}

#[derive(Debug)]
pub enum BlockOutcome {
    Rows(Vec<FactRecord>),
    /// Carries the `FactBlock` error explaining why the block was skipped
    Skipped(EtlError),
}

/// The union of every non-empty fact block of one run
#[derive(Debug, Default)]
pub struct FactTable {
    pub rows: Vec<FactRecord>,
    /// `(source, rows)` for each block that contributed
    pub contributed: Vec<(String, usize)>,
    pub skipped: Vec<EtlError>,
}

impl FactTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Truncate to at most `COMMENT_MAX_CHARS` characters, never splitting a char
pub fn truncate_comment(comment: &str) -> String {
    match comment.char_indices().nth(COMMENT_MAX_CHARS) {
        Some((idx, _)) => comment[..idx].to_string(),
        None => comment.to_string(),
    }
}

fn source_key_for(opinion: &OpinionRecord, sources: &[SourceDim]) -> String {
    if let Some(key) = &opinion.source_id {
        return key.clone();
    }
    opinion
        .source_label
        .as_deref()
        .and_then(|label| {
            sources
                .iter()
                .find(|source| source.name.as_deref() == Some(label))
        })
        .map(|source| source.id.to_string())
        .unwrap_or_else(|| MISSING_KEY.to_string())
}

fn to_fact(opinion: &OpinionRecord, sources: &[SourceDim]) -> FactRecord {
    FactRecord {
        customer_key: opinion
            .customer_id
            .clone()
            .unwrap_or_else(|| MISSING_KEY.to_string()),
        product_key: opinion
            .product_id
            .clone()
            .unwrap_or_else(|| MISSING_KEY.to_string()),
        source_key: source_key_for(opinion, sources),
        date_key: opinion
            .date_key
            .or_else(|| opinion.date.map(|ts| date_key(ts.date())))
            .unwrap_or(MISSING_DATE_KEY),
        score: opinion.score.filter(|s| s.is_finite()).unwrap_or(0.0),
        comment: opinion
            .comment
            .as_deref()
            .map(truncate_comment)
            .unwrap_or_default(),
    }
}

/// Produce the fact block of a single normalized set
pub fn build_block(set: &NormalizedRecordSet, sources: &[SourceDim]) -> BlockOutcome {
    let Some(opinions) = set.opinions() else {
        return BlockOutcome::Skipped(EtlError::FactBlock {
            block: set.source.clone(),
            reason: format!("a {} set carries no opinion events", set.kind().label()),
        });
    };
    if opinions.is_empty() {
        return BlockOutcome::Skipped(EtlError::FactBlock {
            block: set.source.clone(),
            reason: "no rows".to_string(),
        });
    }

    BlockOutcome::Rows(opinions.iter().map(|o| to_fact(o, sources)).collect())
}

/// Assemble the staging fact table from every opinion set of the run
pub fn assemble_facts(sets: &[NormalizedRecordSet], sources: &[SourceDim]) -> FactTable {
    let mut table = FactTable::default();

    for set in sets.iter().filter(|s| s.kind() == SourceKind::Opinions) {
        match build_block(set, sources) {
            BlockOutcome::Rows(rows) => {
                info!(source = %set.source, rows = rows.len(), "fact block assembled");
                table.contributed.push((set.source.clone(), rows.len()));
                table.rows.extend(rows);
            }
            BlockOutcome::Skipped(e) => {
                warn!(source = %set.source, error = %e, "fact block skipped");
                table.skipped.push(e);
            }
        }
    }

    info!(
        rows = table.len(),
        blocks = table.contributed.len(),
        skipped = table.skipped.len(),
        "fact table assembled"
    );
    table
}

// =============================================================================
// TESTS
// =============================================================================
