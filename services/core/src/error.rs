//! Failure taxonomy for the reconciliation stages
//!
//! Every variant except `EmptyWarehouseDimension` is recovered locally by the
//! stage that raises it: the affected source, dimension or block is logged and
//! left empty while the run continues.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EtlError {
    /// A raw source could not be reached or decoded
    #[error("source '{source_id}' is unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    /// A source is missing the columns its shape requires
    #[error("source '{source_id}' does not have the expected shape: {details}")]
    ShapeMismatch { source_id: String, details: String },

    #[error("dimension '{dimension}' could not be built: {reason}")]
    DimensionBuild {
        dimension: &'static str,
        reason: String,
    },

    #[error("fact block '{block}' skipped: {reason}")]
    FactBlock { block: String, reason: String },

    /// The warehouse holds no identifier the resolver could fall back to
    #[error("warehouse dimension '{dimension}' has no usable identifiers")]
    EmptyWarehouseDimension { dimension: &'static str },
}

pub type Result<T, E = EtlError> = std::result::Result<T, E>;
