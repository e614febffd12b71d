//! Dimension Builder
//!
//! Derives the customer, product, source and date dimensions from normalized
//! sets. Each dimension is built in isolation: a failure is logged and leaves
//! that dimension empty without affecting the others.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;
use tracing::{info, warn};

use crate::error::{EtlError, Result};
use crate::model::{CustomerRecord, NormalizedRecordSet, ProductRecord, SourceRecord};

// =============================================================================
// Dimension rows
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerDim {
    /// Business key, e.g. `C012`
    pub key: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductDim {
    /// Business key, e.g. `P004`
    pub key: String,
    pub name: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceDim {
    pub id: i64,
    /// Display label; the source type when the feed has no explicit name
    pub name: Option<String>,
    pub source_type: Option<String>,
    pub loaded_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateDim {
    /// `YYYYMMDD`
    pub key: i64,
    pub date: NaiveDate,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub quarter: u32,
    pub month_name: String,
    pub weekday_name: String,
}

impl DateDim {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            key: date_key(date),
            date,
            year: date.year(),
            month: date.month(),
            day: date.day(),
            quarter: (date.month() - 1) / 3 + 1,
            month_name: date.format("%B").to_string(),
            weekday_name: date.format("%A").to_string(),
        }
    }
}

/// `YYYYMMDD` integer key of a calendar date
pub fn date_key(date: NaiveDate) -> i64 {
    date.year() as i64 * 10_000 + date.month() as i64 * 100 + date.day() as i64
}

/// Zero-padded business key, e.g. `customer_key(12) == "C012"`
pub fn customer_key(id: i64) -> String {
    format!("C{:03}", id)
}

pub fn product_key(id: i64) -> String {
    format!("P{:03}", id)
}

// =============================================================================
// Builders
// =============================================================================

/// All dimensions produced by one run; a dimension that failed to build is empty
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dimensions {
    pub customers: Vec<CustomerDim>,
    pub products: Vec<ProductDim>,
    pub sources: Vec<SourceDim>,
    pub dates: Vec<DateDim>,
}

/// Keeps the first row for each key, preserving input order
fn dedupe_by_key<T, K, F>(rows: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    rows.into_iter().filter(|row| seen.insert(key(row))).collect()
}

/// Ids at or below zero cannot form a business key
fn usable_id(id: Option<i64>) -> Option<i64> {
    id.filter(|id| *id > 0)
}

fn warn_skipped(dimension: &str, skipped: usize) {
    if skipped > 0 {
        warn!(dimension, skipped, "rows without a usable id were skipped");
    }
}

pub fn build_customer_dimension(records: Option<&[CustomerRecord]>) -> Result<Vec<CustomerDim>> {
    let records = records.ok_or(EtlError::DimensionBuild {
        dimension: "customer",
        reason: "no customer source available".to_string(),
    })?;

    let rows: Vec<CustomerDim> = records
        .iter()
        .filter_map(|record| {
            usable_id(record.id).map(|id| CustomerDim {
                key: customer_key(id),
                name: record.name.clone(),
                email: record.email.clone(),
            })
        })
        .collect();
    warn_skipped("customer", records.len() - rows.len());

    Ok(dedupe_by_key(rows, |row| row.key.clone()))
}

pub fn build_product_dimension(records: Option<&[ProductRecord]>) -> Result<Vec<ProductDim>> {
    let records = records.ok_or(EtlError::DimensionBuild {
        dimension: "product",
        reason: "no product source available".to_string(),
    })?;

    let rows: Vec<ProductDim> = records
        .iter()
        .filter_map(|record| {
            usable_id(record.id).map(|id| ProductDim {
                key: product_key(id),
                name: record.name.clone(),
                category: record.category.clone(),
            })
        })
        .collect();
    warn_skipped("product", records.len() - rows.len());

    Ok(dedupe_by_key(rows, |row| row.key.clone()))
}

pub fn build_source_dimension(records: Option<&[SourceRecord]>) -> Result<Vec<SourceDim>> {
    let records = records.ok_or(EtlError::DimensionBuild {
        dimension: "source",
        reason: "no source catalogue available".to_string(),
    })?;

    let rows: Vec<SourceDim> = records
        .iter()
        .filter_map(|record| {
            usable_id(record.id).map(|id| SourceDim {
                id,
                name: record.name.clone().or_else(|| record.source_type.clone()),
                source_type: record.source_type.clone(),
                loaded_at: record.loaded_at,
            })
        })
        .collect();
    warn_skipped("source", records.len() - rows.len());

    Ok(dedupe_by_key(rows, |row| row.id))
}

/// One row per distinct calendar date, ascending
pub fn build_date_dimension<'a, I>(dates: I) -> Vec<DateDim>
where
    I: IntoIterator<Item = &'a NaiveDateTime>,
{
    dates
        .into_iter()
        .map(NaiveDateTime::date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(DateDim::from_date)
        .collect()
}

fn isolate<T>(dimension: &str, built: Result<Vec<T>>) -> Vec<T> {
    match built {
        Ok(rows) => rows,
        Err(e) => {
            warn!(dimension, error = %e, "dimension build failed; continuing with an empty dimension");
            Vec::new()
        }
    }
}

/// Build every dimension from the normalized sets of one run.
///
/// Customers, products and sources come from the sets named `clients`,
/// `products` and `fuente`; dates come from every opinion set.
pub fn build_dimensions(sets: &[NormalizedRecordSet]) -> Dimensions {
    let customers = isolate(
        "customer",
        build_customer_dimension(sets.iter().find_map(NormalizedRecordSet::customers)),
    );
    let products = isolate(
        "product",
        build_product_dimension(sets.iter().find_map(NormalizedRecordSet::products)),
    );
    let sources = isolate(
        "source",
        build_source_dimension(sets.iter().find_map(NormalizedRecordSet::sources)),
    );
    let dates = build_date_dimension(
        sets.iter()
            .filter_map(NormalizedRecordSet::opinions)
            .flatten()
            .filter_map(|opinion| opinion.date.as_ref()),
    );

    info!(
        customers = customers.len(),
        products = products.len(),
        sources = sources.len(),
        dates = dates.len(),
        "dimensions built"
    );

    Dimensions {
        customers,
        products,
        sources,
        dates,
    }
}

// =============================================================================
// TESTS
// =============================================================================
