//! DataLens policy engine
//!
//! Role-based PII redaction decisions: given an authenticated role and a
//! payload of classified entities (or a path about to be touched), decide
//! per entity which transformation applies (show, partial mask, range
//! band, redact, or withhold) and record every decision on an audit sink.
//!
//! Key properties:
//! - Rule tables are total functions over declared roles x PII types,
//!   validated at load; a missing rule is a configuration error, never a
//!   silent default toward disclosure.
//! - Fail closed: a denied path short-circuits with an empty result before
//!   any entity is transformed.
//! - Withheld (`no_access`) entities are omitted from output entirely;
//!   their presence is not disclosed.
//! - Hot reload swaps the whole table atomically; every request evaluates
//!   against one immutable snapshot.
//! - Audit coverage is total: exactly one entry per invocation, success or
//!   failure.

pub mod audit;
pub mod engine;
pub mod error;
pub mod loader;
pub mod path;
pub mod store;
pub mod transform;
pub mod types;

// Re-export primary types for convenience
pub use audit::{AuditSink, ChainedAuditSink, InMemoryAuditSink};
pub use engine::{compute_risk_score, PolicyEngine};
pub use error::{EngineResult, PolicyError};
pub use loader::{build_rule_table, load_rule_table, save_rule_table, RuleTableSpec};
pub use path::{authorize, glob_matches};
pub use store::PolicyStore;
pub use transform::{transform, REDACT_SENTINEL};
pub use types::{
    AccessDecision, Action, AuditAction, AuditEntry, Band, EngineConfig, EvaluationRequest,
    MaskFill, MaskStrategy, MissingRuleBehavior, PathRule, PiiEntity, PolicyResult, PolicyRule,
    RuleParams, RuleTable, Span, TransformedEntity,
};
