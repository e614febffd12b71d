//! Opinion ETL - connectors, staging and warehouse I/O around `opinion-core`
//!
//! Responsibilities:
//! - Read opinions from a relational database, a REST endpoint and flat files
//! - Stage raw sets, dimensions and facts in a SQLite store rebuilt every run
//! - Append staged dimensions to the warehouse
//! - Resolve staged facts against warehouse identifiers and load them atomically

pub mod config;
pub mod extract;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod staging;
pub mod sync;
pub mod warehouse;
