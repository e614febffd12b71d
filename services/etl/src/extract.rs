//! Raw source connectors: flat files, the opinions REST endpoint and the
//! relational opinions table.
//!
//! Every connector returns a `RawRecordSet` or `SourceUnavailable`; callers
//! treat the latter as an empty contribution.

use encoding_rs::WINDOWS_1252;
use opinion_core::{EtlError, RawRecordSet, RawValue, Result};
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Column, Row};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

use crate::config::FileSource;

pub const DB_SOURCE: &str = "db_opiniones";
pub const API_SOURCE: &str = "api_opiniones";

const USER_AGENT: &str = "OpinionEtl/0.1";

fn unavailable(source: &str, reason: impl ToString) -> EtlError {
    EtlError::SourceUnavailable {
        source_id: source.to_string(),
        reason: reason.to_string(),
    }
}

// =============================================================================
// FLAT FILES
// =============================================================================

/// Decode file bytes: UTF-8 (BOM stripped) or Windows-1252 as a fallback
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, _) = WINDOWS_1252.decode(bytes);
            text.into_owned()
        }
    }
}

/// Parse CSV content into a raw set. Empty cells stay empty text.
pub fn parse_csv(content: &str, source: &str) -> Result<RawRecordSet> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| unavailable(source, format!("unreadable header: {}", e)))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut set = RawRecordSet::new(source, columns);
    for (line_idx, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                // +2: 1-indexed plus the header line
                warn!(source, line = line_idx + 2, error = %e, "skipping unreadable CSV line");
                continue;
            }
        };
        set.push_row(
            record
                .iter()
                .map(|field| RawValue::Text(field.to_string()))
                .collect(),
        );
    }

    Ok(set)
}

pub async fn extract_csv(file: &FileSource) -> Result<RawRecordSet> {
    let bytes = fs::read(&file.path)
        .await
        .map_err(|e| unavailable(&file.name, format!("{}: {}", file.path.display(), e)))?;
    parse_csv(&decode_text(&bytes), &file.name)
}

// =============================================================================
// REST ENDPOINT
// =============================================================================

fn flatten_into(prefix: &str, object: &Map<String, Value>, out: &mut Vec<(String, Value)>) {
    for (key, value) in object {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(nested) => flatten_into(&name, nested, out),
            other => out.push((name, other.clone())),
        }
    }
}

fn rows_to_set(source: &str, rows: Vec<Vec<(String, Value)>>) -> RawRecordSet {
    let mut columns: Vec<String> = Vec::new();
    for row in &rows {
        for (key, _) in row {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut set = RawRecordSet::new(source, columns);
    for row in rows {
        let mut cells = vec![RawValue::Null; set.columns.len()];
        for (key, value) in row {
            if let Some(idx) = set.columns.iter().position(|c| *c == key) {
                cells[idx] = RawValue::from_json(&value);
            }
        }
        set.push_row(cells);
    }
    set
}

/// Turn a JSON payload into rows.
///
/// A `data` key is unwrapped first. An array of objects yields one row per
/// object over the union of keys; a single object yields one row with nested
/// objects flattened into `parent.child` columns.
pub fn records_from_json(source: &str, payload: Value) -> RawRecordSet {
    let payload = match payload {
        Value::Object(mut object) if object.contains_key("data") => {
            object.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };

    match payload {
        Value::Array(items) => {
            let mut rows = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Object(object) => rows.push(object.into_iter().collect()),
                    other => warn!(source, item = %other, "skipping non-object array item"),
                }
            }
            rows_to_set(source, rows)
        }
        Value::Object(object) => {
            let mut row = Vec::new();
            flatten_into("", &object, &mut row);
            rows_to_set(source, vec![row])
        }
        Value::Null => RawRecordSet::new(source, Vec::new()),
        other => {
            warn!(source, payload = %other, "unexpected scalar payload");
            RawRecordSet::new(source, Vec::new())
        }
    }
}

pub async fn extract_api(url: &str, timeout: Duration) -> Result<RawRecordSet> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| unavailable(API_SOURCE, e))?;

    let resp = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| unavailable(API_SOURCE, e))?;

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();
    if !content_type.contains("application/json") {
        warn!(source = API_SOURCE, content_type = %content_type, "response is not JSON; treating as empty");
        return Ok(RawRecordSet::new(API_SOURCE, Vec::new()));
    }

    let payload: Value = resp
        .json()
        .await
        .map_err(|e| unavailable(API_SOURCE, format!("invalid JSON body: {}", e)))?;

    Ok(records_from_json(API_SOURCE, payload))
}

// =============================================================================
// RELATIONAL SOURCE
// =============================================================================

/// Run the configured query; every column is decoded as optional text
pub async fn extract_database(url: Option<&str>, query: &str) -> Result<RawRecordSet> {
    let url = url.ok_or_else(|| unavailable(DB_SOURCE, "SOURCE_DB_URL env var missing"))?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await
        .map_err(|e| unavailable(DB_SOURCE, e))?;

    let fetched = sqlx::query(query).fetch_all(&pool).await;
    pool.close().await;
    let rows = fetched.map_err(|e| unavailable(DB_SOURCE, e))?;

    let Some(first) = rows.first() else {
        debug!(source = DB_SOURCE, "query returned no rows");
        return Ok(RawRecordSet::new(DB_SOURCE, Vec::new()));
    };
    let columns: Vec<String> = first.columns().iter().map(|c| c.name().to_string()).collect();

    let mut set = RawRecordSet::new(DB_SOURCE, columns);
    for row in &rows {
        let mut cells = Vec::with_capacity(set.columns.len());
        for idx in 0..set.columns.len() {
            let value: Option<String> = row
                .try_get(idx)
                .map_err(|e| unavailable(DB_SOURCE, format!("column {} is not text: {}", idx, e)))?;
            cells.push(value.map(RawValue::Text).unwrap_or(RawValue::Null));
        }
        set.push_row(cells);
    }

    Ok(set)
}

// =============================================================================
// TESTS
// =============================================================================
