//! Source Normalizer
//!
//! Standardizes field names and coerces values so downstream stages see one
//! typed record variant per source shape. Individual values that fail to
//! coerce degrade to `None`; only a set missing the columns its shape requires
//! is rejected.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use tracing::warn;

use crate::error::{EtlError, Result};
use crate::model::{
    CustomerRecord, NormalizedRecordSet, NormalizedRecords, OpinionRecord, ProductRecord,
    RawRecordSet, RawValue, SourceKind, SourceRecord,
};

// =============================================================================
// Known column names (after standardization), in priority order
// =============================================================================

const CUSTOMER_ID_COLUMNS: &[&str] = &["idcliente", "id_cliente"];
const PRODUCT_ID_COLUMNS: &[&str] = &["idproducto", "id_producto"];
const SOURCE_ID_COLUMNS: &[&str] = &["idfuente", "id_fuente"];
const NAME_COLUMNS: &[&str] = &["nombre", "name"];
const EMAIL_COLUMNS: &[&str] = &["email", "correo"];
const CATEGORY_COLUMNS: &[&str] = &["categoria", "categoría", "category"];
const SOURCE_TYPE_COLUMNS: &[&str] = &["tipofuente", "tipo_fuente"];
const LOAD_DATE_COLUMNS: &[&str] = &["fechacarga", "fecha_carga"];

const OPINION_CUSTOMER_COLUMNS: &[&str] = &["cliente_id", "idcliente"];
const OPINION_PRODUCT_COLUMNS: &[&str] = &["producto_id", "idproducto"];
const OPINION_SOURCE_KEY_COLUMNS: &[&str] = &["fuente_id"];
const OPINION_SOURCE_LABEL_COLUMNS: &[&str] = &["fuente"];
const OPINION_DATE_COLUMNS: &[&str] = &["fecha", "date"];
const OPINION_DATE_KEY_COLUMNS: &[&str] = &["fecha_key"];
const OPINION_SCORE_COLUMNS: &[&str] = &[
    "puntaje",
    "rating",
    "puntajesatisfaccion",
    "puntajesatisfacción",
    "satisfaction-score",
    "satisfaction_score",
    "score",
];
const OPINION_COMMENT_COLUMNS: &[&str] = &["texto_opinion", "comentario", "comment", "text"];

/// Zoned timestamps; the offset is dropped and the wall-clock time kept
/// `%#z` also takes the hour-only offsets Postgres prints for `timestamptz`, e.g. `-03`
const ZONED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M:%S%.f%#z",
];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%Y%m%d"];

// =============================================================================
// Field names and text
// =============================================================================

/// Lower-case, trim, and replace spaces with underscores
pub fn standardize_field_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Standardize every column name of a raw set.
///
/// A column whose standardized name collides with an earlier one is dropped.
pub fn standardize_columns(set: RawRecordSet) -> RawRecordSet {
    let mut seen = HashSet::new();
    let mut keep = Vec::with_capacity(set.columns.len());
    let mut columns = Vec::with_capacity(set.columns.len());

    for (idx, column) in set.columns.iter().enumerate() {
        let name = standardize_field_name(column);
        if seen.insert(name.clone()) {
            keep.push(idx);
            columns.push(name);
        } else {
            warn!(source = %set.source, column = %column, "dropping column whose standardized name is a duplicate");
        }
    }

    let rows = if keep.len() == set.columns.len() {
        set.rows
    } else {
        set.rows
            .into_iter()
            .map(|row| {
                keep.iter()
                    .map(|&idx| row.get(idx).cloned().unwrap_or(RawValue::Null))
                    .collect()
            })
            .collect()
    };

    RawRecordSet {
        source: set.source,
        columns,
        rows,
    }
}

/// Collapse internal whitespace runs to one space and trim
pub fn normalize_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

// =============================================================================
// Value coercion
// =============================================================================

/// Parse a date-like string into a timezone-naive timestamp
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.naive_local());
    }
    for format in ZONED_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(text, format) {
            return Some(ts.naive_local());
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Parse an integer, accepting finite float notation truncated toward zero
pub fn parse_integer(text: &str) -> Option<i64> {
    let text = text.trim();
    text.parse::<i64>().ok().or_else(|| {
        text.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f.trunc() as i64)
    })
}

/// Parse a finite number
pub fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

fn cell(row: &[RawValue], column: Option<usize>) -> Option<&RawValue> {
    column.and_then(|idx| row.get(idx))
}

fn key_at(row: &[RawValue], column: Option<usize>) -> Option<String> {
    cell(row, column)?.to_text()
}

fn text_at(row: &[RawValue], column: Option<usize>) -> Option<String> {
    key_at(row, column).map(|text| normalize_text(&text))
}

fn integer_at(row: &[RawValue], column: Option<usize>) -> Option<i64> {
    match cell(row, column)? {
        RawValue::Int(i) => Some(*i),
        RawValue::Float(f) if f.is_finite() => Some(f.trunc() as i64),
        RawValue::Text(s) => parse_integer(s),
        _ => None,
    }
}

fn number_at(row: &[RawValue], column: Option<usize>) -> Option<f64> {
    match cell(row, column)? {
        RawValue::Int(i) => Some(*i as f64),
        RawValue::Float(f) if f.is_finite() => Some(*f),
        RawValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        RawValue::Text(s) => parse_number(s),
        _ => None,
    }
}

fn timestamp_at(row: &[RawValue], column: Option<usize>) -> Option<NaiveDateTime> {
    parse_timestamp(&cell(row, column)?.to_text()?)
}

// =============================================================================
// Shape validation
// =============================================================================

/// Find the first candidate present among the columns, in candidate order
fn find_column(columns: &[String], candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|candidate| {
        columns
            .iter()
            .position(|column| standardize_field_name(column) == *candidate)
    })
}

fn require_column(set: &RawRecordSet, candidates: &[&str], field: &str) -> Result<usize> {
    find_column(&set.columns, candidates).ok_or_else(|| EtlError::ShapeMismatch {
        source_id: set.source.clone(),
        details: format!(
            "no {} column. Expected one of: {}",
            field,
            candidates.join(", ")
        ),
    })
}

// =============================================================================
// Normalization per source shape
// =============================================================================

/// Normalize a raw set into the record variant its source name implies.
///
/// A set with neither columns nor rows normalizes to an empty set of its kind.
pub fn normalize(set: &RawRecordSet) -> Result<NormalizedRecordSet> {
    let kind = SourceKind::for_source(&set.source);

    let records = if set.columns.is_empty() && set.rows.is_empty() {
        NormalizedRecords::empty(kind)
    } else {
        match kind {
            SourceKind::Customers => NormalizedRecords::Customers(normalize_customers(set)?),
            SourceKind::Products => NormalizedRecords::Products(normalize_products(set)?),
            SourceKind::Sources => NormalizedRecords::Sources(normalize_sources(set)?),
            SourceKind::Opinions => NormalizedRecords::Opinions(normalize_opinions(set)?),
        }
    };

    Ok(NormalizedRecordSet {
        source: set.source.clone(),
        records,
    })
}

fn normalize_customers(set: &RawRecordSet) -> Result<Vec<CustomerRecord>> {
    let id = require_column(set, CUSTOMER_ID_COLUMNS, "customer id")?;
    let name = require_column(set, NAME_COLUMNS, "customer name")?;
    let email = require_column(set, EMAIL_COLUMNS, "customer email")?;

    Ok(set
        .rows
        .iter()
        .map(|row| CustomerRecord {
            id: integer_at(row, Some(id)),
            name: text_at(row, Some(name)),
            email: text_at(row, Some(email)),
        })
        .collect())
}

fn normalize_products(set: &RawRecordSet) -> Result<Vec<ProductRecord>> {
    let id = require_column(set, PRODUCT_ID_COLUMNS, "product id")?;
    let name = require_column(set, NAME_COLUMNS, "product name")?;
    let category = find_column(&set.columns, CATEGORY_COLUMNS);

    Ok(set
        .rows
        .iter()
        .map(|row| ProductRecord {
            id: integer_at(row, Some(id)),
            name: text_at(row, Some(name)),
            category: text_at(row, category),
        })
        .collect())
}

fn normalize_sources(set: &RawRecordSet) -> Result<Vec<SourceRecord>> {
    let id = require_column(set, SOURCE_ID_COLUMNS, "source id")?;
    let source_type = require_column(set, SOURCE_TYPE_COLUMNS, "source type")?;
    let loaded_at = require_column(set, LOAD_DATE_COLUMNS, "load date")?;
    let name = find_column(&set.columns, NAME_COLUMNS);

    Ok(set
        .rows
        .iter()
        .map(|row| SourceRecord {
            id: integer_at(row, Some(id)),
            name: text_at(row, name),
            source_type: text_at(row, Some(source_type)),
            loaded_at: timestamp_at(row, Some(loaded_at)),
        })
        .collect())
}

fn normalize_opinions(set: &RawRecordSet) -> Result<Vec<OpinionRecord>> {
    let customer = find_column(&set.columns, OPINION_CUSTOMER_COLUMNS);
    let product = find_column(&set.columns, OPINION_PRODUCT_COLUMNS);
    let source_key = find_column(&set.columns, OPINION_SOURCE_KEY_COLUMNS);
    let source_label = find_column(&set.columns, OPINION_SOURCE_LABEL_COLUMNS);
    let date = find_column(&set.columns, OPINION_DATE_COLUMNS);
    let date_key = find_column(&set.columns, OPINION_DATE_KEY_COLUMNS);
    let score = find_column(&set.columns, OPINION_SCORE_COLUMNS);
    let comment = find_column(&set.columns, OPINION_COMMENT_COLUMNS);

    let known = [
        customer,
        product,
        source_key,
        source_label,
        date,
        date_key,
        score,
        comment,
    ];
    if known.iter().all(Option::is_none) {
        return Err(EtlError::ShapeMismatch {
            source_id: set.source.clone(),
            details: format!(
                "no opinion field among columns {:?}",
                set.columns
            ),
        });
    }

    Ok(set
        .rows
        .iter()
        .map(|row| OpinionRecord {
            customer_id: key_at(row, customer),
            product_id: key_at(row, product),
            source_id: key_at(row, source_key),
            source_label: text_at(row, source_label),
            date: timestamp_at(row, date),
            date_key: integer_at(row, date_key),
            score: number_at(row, score),
            comment: text_at(row, comment),
        })
        .collect())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

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

    // -------------------------------------------------------------------------
    // FIELD NAME TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_standardize_field_name() {
        assert_eq!(standardize_field_name("  IdCliente "), "idcliente");
        assert_eq!(standardize_field_name("Texto Opinion"), "texto_opinion");
        assert_eq!(standardize_field_name("Categoría"), "categoría");
    }

    #[test]
    fn test_standardize_columns_drops_duplicates() {
        let set = raw(
            "surveys",
            &["Fecha", "fecha ", "Comentario"],
            vec![vec![text("2024-01-01"), text("ignored"), text("ok")]],
        );
        let set = standardize_columns(set);
        assert_eq!(set.columns, vec!["fecha", "comentario"]);
        assert_eq!(set.rows[0], vec![text("2024-01-01"), text("ok")]);
    }

    #[test]
    fn test_normalize_text_collapses_whitespace() {
        assert_eq!(normalize_text("  Ana \t  María\n Pérez "), "Ana María Pérez");
    }

    // -------------------------------------------------------------------------
    // VALUE COERCION TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2024-03-15"), Some(expected));
        assert_eq!(parse_timestamp("15/03/2024"), Some(expected));
        assert_eq!(parse_timestamp("2024/03/15"), Some(expected));

        let with_time = parse_timestamp("2024-03-15 10:30:00").unwrap();
        assert_eq!(with_time.hour(), 10);
        assert_eq!(with_time.minute(), 30);
    }

    #[test]
    fn test_parse_timestamp_drops_offset() {
        let ts = parse_timestamp("2024-03-15T23:00:00-03:00").unwrap();
        assert_eq!(ts.date(), NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(ts.hour(), 23);
    }

    #[test]
    fn test_parse_timestamp_hour_only_offset() {
        let ts = parse_timestamp("2024-03-15 10:30:00-03").unwrap();
        assert_eq!(ts.date(), NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(ts.hour(), 10);
        assert_eq!(ts.minute(), 30);

        let ts = parse_timestamp("2024-03-15 10:30:00.123+00").unwrap();
        assert_eq!(ts.date(), NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(ts.second(), 0);
    }

    #[test]
    fn test_parse_timestamp_invalid_is_missing() {
        assert_eq!(parse_timestamp("not-a-date"), None);
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("2024-13-45"), None);
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer(" 42 "), Some(42));
        assert_eq!(parse_integer("42.0"), Some(42));
        assert_eq!(parse_integer("-1"), Some(-1));
        assert_eq!(parse_integer("C042"), None);
        assert_eq!(parse_integer("NaN"), None);
    }

    // -------------------------------------------------------------------------
    // SHAPE TESTS
    // -------------------------------------------------------------------------

    #[test]
    fn test_customers_normalize() {
        let set = raw(
            "clients",
            &["idcliente", "nombre", "email"],
            vec![
                vec![text("7"), text("  Ana   Pérez "), text("ana@example.com")],
                vec![text("x"), text("Luis"), RawValue::Null],
            ],
        );
        let normalized = normalize(&set).unwrap();
        let customers = normalized.customers().unwrap();
        assert_eq!(customers[0].id, Some(7));
        assert_eq!(customers[0].name.as_deref(), Some("Ana Pérez"));
        assert_eq!(customers[1].id, None);
        assert_eq!(customers[1].email, None);
    }

    #[test]
    fn test_customers_missing_email_column_is_shape_mismatch() {
        let set = raw("clients", &["idcliente", "nombre"], vec![vec![text("1"), text("Ana")]]);
        let err = normalize(&set).unwrap_err();
        assert!(matches!(err, EtlError::ShapeMismatch { .. }));
        assert!(err.to_string().contains("customer email"));
    }

    #[test]
    fn test_products_accept_accented_category() {
        let set = raw(
            "products",
            &["idproducto", "nombre", "categoría"],
            vec![vec![text("3"), text("Laptop"), text("Electrónica")]],
        );
        let normalized = normalize(&set).unwrap();
        let products = normalized.products().unwrap();
        assert_eq!(products[0].category.as_deref(), Some("Electrónica"));
    }

    #[test]
    fn test_products_prefer_unaccented_category() {
        let set = raw(
            "products",
            &["idproducto", "nombre", "categoría", "categoria"],
            vec![vec![text("3"), text("Laptop"), text("old"), text("new")]],
        );
        let normalized = normalize(&set).unwrap();
        assert_eq!(normalized.products().unwrap()[0].category.as_deref(), Some("new"));
    }

    #[test]
    fn test_products_without_category() {
        let set = raw("products", &["idproducto", "nombre"], vec![vec![text("3"), text("Laptop")]]);
        let normalized = normalize(&set).unwrap();
        assert_eq!(normalized.products().unwrap()[0].category, None);
    }

    #[test]
    fn test_sources_normalize() {
        let set = raw(
            "fuente",
            &["idfuente", "tipofuente", "fechacarga"],
            vec![vec![text("1"), text("Web"), text("2024-01-01 08:00:00")]],
        );
        let normalized = normalize(&set).unwrap();
        let sources = normalized.sources().unwrap();
        assert_eq!(sources[0].id, Some(1));
        assert_eq!(sources[0].name, None);
        assert_eq!(sources[0].source_type.as_deref(), Some("Web"));
        assert!(sources[0].loaded_at.is_some());
    }

    #[test]
    fn test_opinions_synonyms() {
        let set = raw(
            "web_reviews",
            &["idcliente", "idproducto", "fecha", "comentario", "rating", "fuente"],
            vec![vec![
                text("12"),
                text("4"),
                text("not-a-date"),
                text("  Muy   bueno "),
                text("4.5"),
                text("Web"),
            ]],
        );
        let normalized = normalize(&set).unwrap();
        let opinion = &normalized.opinions().unwrap()[0];
        assert_eq!(opinion.customer_id.as_deref(), Some("12"));
        assert_eq!(opinion.product_id.as_deref(), Some("4"));
        assert_eq!(opinion.date, None);
        assert_eq!(opinion.comment.as_deref(), Some("Muy bueno"));
        assert_eq!(opinion.score, Some(4.5));
        assert_eq!(opinion.source_label.as_deref(), Some("Web"));
    }

    #[test]
    fn test_opinions_accented_satisfaction_score() {
        let set = raw("surveys", &["puntajesatisfacción"], vec![vec![text("3")]]);
        let normalized = normalize(&set).unwrap();
        assert_eq!(normalized.opinions().unwrap()[0].score, Some(3.0));
    }

    #[test]
    fn test_opinions_unparseable_score_is_missing() {
        let set = raw("surveys", &["rating"], vec![vec![text("excelente")]]);
        let normalized = normalize(&set).unwrap();
        assert_eq!(normalized.opinions().unwrap()[0].score, None);
    }

    #[test]
    fn test_opinions_without_known_fields_is_shape_mismatch() {
        let set = raw("social_comments", &["foo", "bar"], vec![vec![text("1"), text("2")]]);
        assert!(matches!(
            normalize(&set),
            Err(EtlError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_set_normalizes_to_empty_kind() {
        let set = RawRecordSet::new("api_opiniones", vec![]);
        let normalized = normalize(&set).unwrap();
        assert_eq!(normalized.kind(), SourceKind::Opinions);
        assert!(normalized.is_empty());

        let set = RawRecordSet::new("clients", vec![]);
        assert_eq!(normalize(&set).unwrap().kind(), SourceKind::Customers);
    }

    #[test]
    fn test_json_typed_values() {
        let set = raw(
            "api_opiniones",
            &["idcliente", "puntaje"],
            vec![vec![RawValue::Int(501), RawValue::Float(4.0)]],
        );
        let normalized = normalize(&set).unwrap();
        let opinion = &normalized.opinions().unwrap()[0];
        assert_eq!(opinion.customer_id.as_deref(), Some("501"));
        assert_eq!(opinion.score, Some(4.0));
    }
}
