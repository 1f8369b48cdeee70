//! Repair engine for corpora of templated analytical SQL.
//!
//! Static structural rules fix the generator's recurring syntax residue
//! without a database; the iterative loop in [`repair`] executes each query
//! against a live database, classifies the error, applies the matching
//! rewrites and tries again.

pub mod classify;
pub mod config;
pub mod corpus;
pub mod eventlog;
pub mod live;
pub mod paths;
pub mod repair;
pub mod rules;
pub mod schema;

// Re-export commonly used types
pub use classify::{classify, Classification, ErrorCategory};
pub use corpus::{CorpusStore, QueryRecord};
pub use repair::{RepairOutcome, RepairSession, RepairState};
pub use schema::SchemaSnapshot;
