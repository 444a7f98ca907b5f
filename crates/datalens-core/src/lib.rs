//! Shared primitives for the DataLens policy engine: typed identifiers and
//! the canonical timestamp representation used across rule tables, decisions
//! and audit records.

pub mod types;

pub use types::*;
