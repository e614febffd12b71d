//! Record shapes shared by the reconciliation stages
//!
//! Raw sets arrive loosely typed from connectors. Normalized sets carry one
//! explicit record variant per known source shape; a field the source does not
//! provide, or a value that failed to coerce, is `None`.

use chrono::NaiveDateTime;

/// Business key assigned when a source provides no usable key
pub const MISSING_KEY: &str = "-1";

/// Date key assigned when a source provides no parseable date
pub const MISSING_DATE_KEY: i64 = -1;

/// Maximum length of an opinion comment, in characters
pub const COMMENT_MAX_CHARS: usize = 2000;

// =============================================================================
// Raw records
// =============================================================================

/// A single loosely-typed cell as delivered by a connector
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawValue {
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => RawValue::Null,
            serde_json::Value::Bool(b) => RawValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => RawValue::Int(i),
                None => n.as_f64().map(RawValue::Float).unwrap_or(RawValue::Null),
            },
            serde_json::Value::String(s) => RawValue::Text(s.clone()),
            other => RawValue::Text(other.to_string()),
        }
    }

    /// Renders the value as trimmed text; `None` for nulls, NaN and blank strings.
    pub fn to_text(&self) -> Option<String> {
        let text = match self {
            RawValue::Null => return None,
            RawValue::Float(f) if f.is_nan() => return None,
            RawValue::Bool(b) => b.to_string(),
            RawValue::Int(i) => i.to_string(),
            RawValue::Float(f) => format_float(*f),
            RawValue::Text(s) => s.trim().to_string(),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Integral floats render without a fractional part so `12.0` keys as `12`
fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// An ordered set of rows with named columns, one per raw source
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRecordSet {
    /// Source name, e.g. `clients` or `db_opiniones`; staged as `stg_<source>`
    pub source: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RawValue>>,
}

impl RawRecordSet {
    pub fn new(source: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            source: source.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a row, padding with nulls or truncating to the column count.
    pub fn push_row(&mut self, mut row: Vec<RawValue>) {
        row.resize(self.columns.len(), RawValue::Null);
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// =============================================================================
// Source shapes
// =============================================================================

/// The record variant a source normalizes into, decided by its name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Customers,
    Products,
    Sources,
    Opinions,
}

impl SourceKind {
    pub fn for_source(source: &str) -> Self {
        match source {
            "clients" => SourceKind::Customers,
            "products" => SourceKind::Products,
            "fuente" => SourceKind::Sources,
            _ => SourceKind::Opinions,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Customers => "customers",
            SourceKind::Products => "products",
            SourceKind::Sources => "sources",
            SourceKind::Opinions => "opinions",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRecord {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub id: Option<i64>,
    /// Explicit display name; most source feeds only carry a type label
    pub name: Option<String>,
    pub source_type: Option<String>,
    pub loaded_at: Option<NaiveDateTime>,
}

/// One opinion event as provided by a database, API or file source
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpinionRecord {
    pub customer_id: Option<String>,
    pub product_id: Option<String>,
    /// Source business key, when the feed already carries one
    pub source_id: Option<String>,
    /// Free-text source label, joined against the Source dimension name
    pub source_label: Option<String>,
    pub date: Option<NaiveDateTime>,
    pub date_key: Option<i64>,
    pub score: Option<f64>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedRecords {
    Customers(Vec<CustomerRecord>),
    Products(Vec<ProductRecord>),
    Sources(Vec<SourceRecord>),
    Opinions(Vec<OpinionRecord>),
}

impl NormalizedRecords {
    pub fn empty(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Customers => NormalizedRecords::Customers(Vec::new()),
            SourceKind::Products => NormalizedRecords::Products(Vec::new()),
            SourceKind::Sources => NormalizedRecords::Sources(Vec::new()),
            SourceKind::Opinions => NormalizedRecords::Opinions(Vec::new()),
        }
    }
}

/// A raw set after field standardization and value coercion. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecordSet {
    pub source: String,
    pub records: NormalizedRecords,
}

impl NormalizedRecordSet {
    pub fn kind(&self) -> SourceKind {
        match &self.records {
            NormalizedRecords::Customers(_) => SourceKind::Customers,
            NormalizedRecords::Products(_) => SourceKind::Products,
            NormalizedRecords::Sources(_) => SourceKind::Sources,
            NormalizedRecords::Opinions(_) => SourceKind::Opinions,
        }
    }

    pub fn len(&self) -> usize {
        match &self.records {
            NormalizedRecords::Customers(r) => r.len(),
            NormalizedRecords::Products(r) => r.len(),
            NormalizedRecords::Sources(r) => r.len(),
            NormalizedRecords::Opinions(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn customers(&self) -> Option<&[CustomerRecord]> {
        match &self.records {
            NormalizedRecords::Customers(r) => Some(r),
            _ => None,
        }
    }

    pub fn products(&self) -> Option<&[ProductRecord]> {
        match &self.records {
            NormalizedRecords::Products(r) => Some(r),
            _ => None,
        }
    }

    pub fn sources(&self) -> Option<&[SourceRecord]> {
        match &self.records {
            NormalizedRecords::Sources(r) => Some(r),
            _ => None,
        }
    }

    pub fn opinions(&self) -> Option<&[OpinionRecord]> {
        match &self.records {
            NormalizedRecords::Opinions(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_text_trims_and_blanks() {
        assert_eq!(RawValue::Text("  C01 ".into()).to_text(), Some("C01".to_string()));
        assert_eq!(RawValue::Text("   ".into()).to_text(), None);
        assert_eq!(RawValue::Null.to_text(), None);
    }

    #[test]
    fn test_to_text_integral_float() {
        assert_eq!(RawValue::Float(12.0).to_text(), Some("12".to_string()));
        assert_eq!(RawValue::Float(12.5).to_text(), Some("12.5".to_string()));
        assert_eq!(RawValue::Float(f64::NAN).to_text(), None);
    }

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(RawValue::from_json(&serde_json::json!(7)), RawValue::Int(7));
        assert_eq!(RawValue::from_json(&serde_json::json!(4.5)), RawValue::Float(4.5));
        assert_eq!(
            RawValue::from_json(&serde_json::json!([1, 2])),
            RawValue::Text("[1,2]".to_string())
        );
    }

    #[test]
    fn test_push_row_pads_and_truncates() {
        let mut set = RawRecordSet::new("surveys", vec!["a".into(), "b".into()]);
        set.push_row(vec![RawValue::Int(1)]);
        set.push_row(vec![RawValue::Int(1), RawValue::Int(2), RawValue::Int(3)]);
        assert_eq!(set.rows[0], vec![RawValue::Int(1), RawValue::Null]);
        assert_eq!(set.rows[1].len(), 2);
    }

    #[test]
    fn test_source_kind_by_name() {
        assert_eq!(SourceKind::for_source("clients"), SourceKind::Customers);
        assert_eq!(SourceKind::for_source("products"), SourceKind::Products);
        assert_eq!(SourceKind::for_source("fuente"), SourceKind::Sources);
        assert_eq!(SourceKind::for_source("web_reviews"), SourceKind::Opinions);
        assert_eq!(SourceKind::for_source("api_opiniones"), SourceKind::Opinions);
    }
}
