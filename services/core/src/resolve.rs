//! Warehouse Key Resolver
//!
//! Maps staging business keys onto identifiers the warehouse already holds.
//! Resolution is total: every fact row yields exactly one resolved row.
//!
//! - Customer and product keys wrap modulo the largest warehouse id
//! - Date keys match exactly on `YYYYMMDD`, else take the smallest date id
//! - Every row takes the smallest source id

use chrono::NaiveDate;
use std::collections::HashMap;

use crate::dimensions::date_key;
use crate::error::{EtlError, Result};
use crate::facts::FactRecord;

/// A fact row carrying warehouse foreign keys, ready for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFactRecord {
    pub product_id: i64,
    pub customer_id: i64,
    pub source_id: i64,
    pub date_id: i64,
    pub score: i32,
    /// Always empty; no classification is performed
    pub sentiment: String,
    pub comment: String,
}

/// A row of the warehouse date dimension
#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseDate {
    pub id: i64,
    pub date: Option<NaiveDate>,
}

/// The identifier ranges resolution falls back onto, read once per run
#[derive(Debug, Clone)]
pub struct WarehouseSnapshot {
    max_customer_id: i64,
    max_product_id: i64,
    default_source_id: i64,
    default_date_id: i64,
    date_ids: HashMap<i64, i64>,
}

fn positive(ids: &[i64]) -> impl Iterator<Item = i64> + '_ {
    ids.iter().copied().filter(|&id| id > 0)
}

impl WarehouseSnapshot {
    /// Build from the warehouse identifier columns.
    ///
    /// Only positive ids are usable. A dimension with none fails with
    /// `EmptyWarehouseDimension` since no fallback can be valid.
    pub fn new(
        customer_ids: &[i64],
        product_ids: &[i64],
        source_ids: &[i64],
        dates: &[WarehouseDate],
    ) -> Result<Self> {
        let max_customer_id = positive(customer_ids)
            .max()
            .ok_or(EtlError::EmptyWarehouseDimension { dimension: "Customer" })?;
        let max_product_id = positive(product_ids)
            .max()
            .ok_or(EtlError::EmptyWarehouseDimension { dimension: "Product" })?;
        let default_source_id = positive(source_ids)
            .min()
            .ok_or(EtlError::EmptyWarehouseDimension { dimension: "Source" })?;
        let default_date_id = dates
            .iter()
            .map(|d| d.id)
            .filter(|&id| id > 0)
            .min()
            .ok_or(EtlError::EmptyWarehouseDimension { dimension: "Date" })?;

        let mut date_ids: HashMap<i64, i64> = HashMap::new();
        for row in dates.iter().filter(|d| d.id > 0) {
            if let Some(date) = row.date {
                date_ids
                    .entry(date_key(date))
                    .and_modify(|id| *id = (*id).min(row.id))
                    .or_insert(row.id);
            }
        }

        Ok(Self {
            max_customer_id,
            max_product_id,
            default_source_id,
            default_date_id,
            date_ids,
        })
    }

    pub fn max_customer_id(&self) -> i64 {
        self.max_customer_id
    }

    pub fn max_product_id(&self) -> i64 {
        self.max_product_id
    }

    pub fn default_source_id(&self) -> i64 {
        self.default_source_id
    }

    pub fn default_date_id(&self) -> i64 {
        self.default_date_id
    }

    pub fn resolve_customer(&self, key: &str) -> i64 {
        wrap_key(key_magnitude(key), self.max_customer_id)
    }

    pub fn resolve_product(&self, key: &str) -> i64 {
        wrap_key(key_magnitude(key), self.max_product_id)
    }

    pub fn resolve_date(&self, date_key: i64) -> i64 {
        self.date_ids
            .get(&date_key)
            .copied()
            .unwrap_or(self.default_date_id)
    }

    pub fn resolve(&self, fact: &FactRecord) -> ResolvedFactRecord {
        ResolvedFactRecord {
            product_id: self.resolve_product(&fact.product_key),
            customer_id: self.resolve_customer(&fact.customer_key),
            source_id: self.default_source_id,
            date_id: self.resolve_date(fact.date_key),
            score: score_to_int(fact.score),
            sentiment: String::new(),
            comment: fact.comment.clone(),
        }
    }
}

/// Numeric magnitude of a business key; `1` when it does not parse
pub fn key_magnitude(key: &str) -> i64 {
    let key = key.trim();
    key.parse::<i64>()
        .ok()
        .or_else(|| {
            key.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        })
        .unwrap_or(1)
}

/// `((value - 1) mod max) + 1`, always within `[1, max]` for `max >= 1`
pub fn wrap_key(value: i64, max: i64) -> i64 {
    let max = i128::from(max.max(1));
    let wrapped = (i128::from(value) - 1).rem_euclid(max) + 1;
    // wrapped lies in [1, max] and max came from an i64
    wrapped as i64
}

fn score_to_int(score: f64) -> i32 {
    if score.is_finite() {
        // `as` saturates out-of-range floats
        score.trunc() as i32
    } else {
        0
    }
}

/// Resolve every fact row; the output has the same length and order as the input
pub fn resolve_facts(facts: &[FactRecord], snapshot: &WarehouseSnapshot) -> Vec<ResolvedFactRecord> {
    facts.iter().map(|fact| snapshot.resolve(fact)).collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn snapshot() -> WarehouseSnapshot {
        let customers: Vec<i64> = (1..=500).collect();
        let products: Vec<i64> = (1..=20).collect();
        WarehouseSnapshot::new(
            &customers,
            &products,
            &[7, 3, 9],
            &[
                WarehouseDate { id: 11, date: Some(ymd(2024, 1, 1)) },
                WarehouseDate { id: 12, date: Some(ymd(2024, 1, 2)) },
                WarehouseDate { id: 10, date: None },
            ],
        )
        .unwrap()
    }

    fn fact(customer: &str, product: &str, date_key: i64) -> FactRecord {
        FactRecord {
            customer_key: customer.to_string(),
            product_key: product.to_string(),
            source_key: "-1".to_string(),
            date_key,
            score: 4.7,
            comment: "ok".to_string(),
        }
    }

    #[test]
    fn test_wrap_key() {
        assert_eq!(wrap_key(501, 500), 1);
        assert_eq!(wrap_key(500, 500), 500);
        assert_eq!(wrap_key(1, 500), 1);
        assert_eq!(wrap_key(0, 500), 500);
        assert_eq!(wrap_key(-1, 500), 499);
        assert_eq!(wrap_key(i64::MIN, 7), (((i64::MIN as i128) - 1).rem_euclid(7) + 1) as i64);
    }

    #[test]
    fn test_wrap_key_always_in_range() {
        for value in [-1000, -1, 0, 1, 2, 499, 500, 501, 1_000_000, i64::MAX, i64::MIN] {
            let id = wrap_key(value, 500);
            assert!((1..=500).contains(&id), "{} -> {}", value, id);
        }
    }

    #[test]
    fn test_key_magnitude() {
        assert_eq!(key_magnitude("501"), 501);
        assert_eq!(key_magnitude(" 12.0 "), 12);
        assert_eq!(key_magnitude("-1"), -1);
        assert_eq!(key_magnitude("C012"), 1);
        assert_eq!(key_magnitude(""), 1);
    }

    #[test]
    fn test_snapshot_ranges() {
        let snapshot = snapshot();
        assert_eq!(snapshot.max_customer_id(), 500);
        assert_eq!(snapshot.max_product_id(), 20);
        assert_eq!(snapshot.default_source_id(), 3);
        assert_eq!(snapshot.default_date_id(), 10);
    }

    #[test]
    fn test_empty_dimension_is_an_error() {
        let err = WarehouseSnapshot::new(&[1], &[], &[1], &[WarehouseDate { id: 1, date: None }])
            .unwrap_err();
        assert!(matches!(
            err,
            EtlError::EmptyWarehouseDimension { dimension: "Product" }
        ));
    }

    #[test]
    fn test_non_positive_ids_are_ignored() {
        let err = WarehouseSnapshot::new(&[0, -4], &[1], &[1], &[WarehouseDate { id: 1, date: None }])
            .unwrap_err();
        assert!(matches!(
            err,
            EtlError::EmptyWarehouseDimension { dimension: "Customer" }
        ));
    }

    #[test]
    fn test_resolve_row() {
        let resolved = snapshot().resolve(&fact("501", "21", 20240102));
        assert_eq!(resolved.customer_id, 1);
        assert_eq!(resolved.product_id, 1);
        assert_eq!(resolved.source_id, 3);
        assert_eq!(resolved.date_id, 12);
        assert_eq!(resolved.score, 4);
        assert_eq!(resolved.sentiment, "");
        assert_eq!(resolved.comment, "ok");
    }

    #[test]
    fn test_unmatched_date_takes_smallest_id() {
        let snapshot = snapshot();
        assert_eq!(snapshot.resolve_date(-1), 10);
        assert_eq!(snapshot.resolve_date(20991231), 10);
    }

    #[test]
    fn test_duplicate_dates_map_to_smallest_id() {
        let snapshot = WarehouseSnapshot::new(
            &[1],
            &[1],
            &[1],
            &[
                WarehouseDate { id: 40, date: Some(ymd(2024, 5, 5)) },
                WarehouseDate { id: 35, date: Some(ymd(2024, 5, 5)) },
            ],
        )
        .unwrap();
        assert_eq!(snapshot.resolve_date(20240505), 35);
    }

    #[test]
    fn test_score_saturates() {
        assert_eq!(score_to_int(1e20), i32::MAX);
        assert_eq!(score_to_int(-2.9), -2);
        assert_eq!(score_to_int(f64::NAN), 0);
    }

    #[test]
    fn test_resolve_facts_preserves_order_and_count() {
        let facts = vec![fact("1", "1", -1), fact("x", "-1", 20240101), fact("2", "2", 0)];
        let resolved = resolve_facts(&facts, &snapshot());
        assert_eq!(resolved.len(), facts.len());
        assert_eq!(resolved[0].customer_id, 1);
        assert_eq!(resolved[1].customer_id, 1);
        assert_eq!(resolved[1].product_id, 19);
        assert_eq!(resolved[1].date_id, 11);
        assert_eq!(resolved[2].customer_id, 2);
    }
}
