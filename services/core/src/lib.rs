//! Opinion Core - dimension conformance and fact key resolution
//!
//! Responsibilities:
//! - Normalize heterogeneous raw record sets into typed per-source records
//! - Build deduplicated Customer/Product/Source/Date dimensions
//! - Assemble per-source fact blocks into one canonical fact table
//! - Resolve fact business keys onto warehouse identifiers without dropping rows
//!
//! This crate performs no I/O. Connectors, staging and the warehouse live in
//! the `opinion-etl` service.

pub mod dimensions;
pub mod error;
pub mod facts;
pub mod model;
pub mod normalize;
pub mod resolve;

pub use dimensions::{build_dimensions, CustomerDim, DateDim, Dimensions, ProductDim, SourceDim};
pub use error::{EtlError, Result};
pub use facts::{assemble_facts, BlockOutcome, FactRecord, FactTable};
pub use model::{
    NormalizedRecordSet, NormalizedRecords, RawRecordSet, RawValue, SourceKind,
};
pub use normalize::{normalize, standardize_columns};
pub use resolve::{resolve_facts, ResolvedFactRecord, WarehouseDate, WarehouseSnapshot};
