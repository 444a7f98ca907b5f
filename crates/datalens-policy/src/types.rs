use datalens_core::{PiiType, RoleId, SourceId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Action — disclosure action for one (role, PII type) pair
// ---------------------------------------------------------------------------

/// Disclosure action. Exhaustive (no #[non_exhaustive]) so a new action
/// forces compile-time review of every match site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Output the entity verbatim.
    Show,
    /// Deterministic partial mask driven by the rule's `MaskStrategy`.
    Partial,
    /// Disclose only the range bucket the numeric value falls in.
    Band,
    /// Replace with a sentinel; nothing of the value is disclosed.
    Redact,
    /// Withhold the entity entirely; its presence is not disclosed either.
    NoAccess,
}

impl Action {
    /// Whether this action degrades or withholds the entity (anything but `Show`).
    pub fn protects(self) -> bool {
        !matches!(self, Action::Show)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Show => write!(f, "show"),
            Action::Partial => write!(f, "partial"),
            Action::Band => write!(f, "band"),
            Action::Redact => write!(f, "redact"),
            Action::NoAccess => write!(f, "no_access"),
        }
    }
}

// ---------------------------------------------------------------------------
// Mask strategies — data-driven partial masking
// ---------------------------------------------------------------------------

/// How the masked region is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskFill {
    /// One `*` per masked alphanumeric; separator characters survive
    /// (`123-45-6789` -> `***-**-6789`).
    PerChar,
    /// Collapse the masked region to a fixed number of `*`s, disclosing
    /// nothing about its length (`sjohnson@...` -> `s***@...`).
    Fixed(u8),
}

fn default_fill() -> MaskFill {
    MaskFill::PerChar
}

/// Partial-mask strategy. Strategies are configured per rule, not per PII
/// type, so a new type reuses an existing strategy without code changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskStrategy {
    /// Keep the first `keep` characters. With `preserve_from` set,
    /// everything from that character's first occurrence onward is kept
    /// verbatim (email: keep 1, preserve from `@`).
    PrefixKeep {
        keep: usize,
        #[serde(default)]
        preserve_from: Option<char>,
        #[serde(default = "default_fill")]
        fill: MaskFill,
    },
    /// Keep the last `keep` alphanumeric characters.
    SuffixKeep {
        keep: usize,
        #[serde(default = "default_fill")]
        fill: MaskFill,
    },
    /// Replace the whole value with `length` mask characters.
    FixedSentinel { length: usize },
}

// ---------------------------------------------------------------------------
// Band — named numeric range, half-open [lower, upper)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub lower: f64,
    pub upper: f64,
    pub label: String,
}

impl Band {
    pub fn new(lower: f64, upper: f64, label: impl Into<String>) -> Self {
        Self {
            lower,
            upper,
            label: label.into(),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value < self.upper
    }
}

// ---------------------------------------------------------------------------
// PolicyRule / PathRule — the rule table's entries
// ---------------------------------------------------------------------------

/// Parameters configuring `partial` and `band` rules. `sentinel` overrides
/// the default `[REDACTED]` text for `redact` rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleParams {
    #[serde(default)]
    pub mask: Option<MaskStrategy>,
    #[serde(default)]
    pub bands: Vec<Band>,
    #[serde(default)]
    pub sentinel: Option<String>,
}

/// The disclosure decision for one (role, PII type) pair. Exactly one
/// active rule exists per pair in a valid table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub role: RoleId,
    pub pii_type: PiiType,
    pub action: Action,
    #[serde(default)]
    pub params: RuleParams,
}

/// A role's path and source allowances. Path access is the union of its
/// glob matches; `*` matches everything in both lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRule {
    pub role: RoleId,
    pub allowed_globs: Vec<String>,
    pub allowed_sources: Vec<SourceId>,
}

impl PathRule {
    pub fn permits_source(&self, source: &SourceId) -> bool {
        self.allowed_sources
            .iter()
            .any(|s| s.as_str() == "*" || s == source)
    }
}

// ---------------------------------------------------------------------------
// RuleTable — immutable, whole-table-swapped rule set
// ---------------------------------------------------------------------------

/// Immutable rule table: a total function over declared roles x declared
/// PII types, plus per-role path rules. Built and validated by the loader,
/// swapped wholesale by the store; a single request only ever observes one
/// generation.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    pub generation: u64,
    pub pii_types: Vec<PiiType>,
    pub rules: HashMap<RoleId, HashMap<PiiType, PolicyRule>>,
    pub path_rules: HashMap<RoleId, PathRule>,
}

impl RuleTable {
    pub fn rule(&self, role: &RoleId, pii_type: &PiiType) -> Option<&PolicyRule> {
        self.rules.get(role).and_then(|by_type| by_type.get(pii_type))
    }

    pub fn path_rule(&self, role: &RoleId) -> Option<&PathRule> {
        self.path_rules.get(role)
    }

    pub fn role_count(&self) -> usize {
        self.rules.len()
    }
}

// ---------------------------------------------------------------------------
// Entities — detector input and engine output
// ---------------------------------------------------------------------------

/// Byte span of an entity in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// One classified entity, supplied by the external PII detector.
/// Immutable input; the engine never re-classifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiEntity {
    pub pii_type: PiiType,
    pub span: Span,
    pub original_text: String,
}

/// The engine's output for one disclosed entity. Spans are the original
/// input spans, so consumers can re-splice text by offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedEntity {
    pub pii_type: PiiType,
    pub span: Span,
    pub output_text: String,
    pub action_applied: Action,
}

// ---------------------------------------------------------------------------
// Decisions and results
// ---------------------------------------------------------------------------

/// Outcome of a path/source authorization check. A denial is a normal
/// decision, not an error; `reason` carries the canonical denial text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl AccessDecision {
    pub fn granted() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn denied(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// A complete evaluation request: who (role) reads which payload's entities
/// from where (source + path). The role is always an explicit parameter;
/// the engine holds no ambient identity state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub role: RoleId,
    pub source_id: SourceId,
    /// Enabled flag for the backing source, resolved by the external
    /// data-source directory before the request reaches the engine.
    pub source_enabled: bool,
    pub path: String,
    pub entities: Vec<PiiEntity>,
}

/// Per-request result. Created and discarded per call; never persisted by
/// the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyResult {
    /// Disclosed entities in input order. Withheld (`no_access`) entities
    /// never appear here.
    pub transformed_entities: Vec<TransformedEntity>,
    pub entities_denied: usize,
    pub access_decision: AccessDecision,
    pub risk_score: f64,
    pub response_latency: Duration,
}

// ---------------------------------------------------------------------------
// Audit records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Query,
    AccessCheck,
    RuleUpdate,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditAction::Query => write!(f, "query"),
            AuditAction::AccessCheck => write!(f, "access_check"),
            AuditAction::RuleUpdate => write!(f, "rule_update"),
        }
    }
}

/// Append-only audit record, one per engine invocation, success or
/// failure. Serialization is the sink's choice; these derives only fix the
/// field contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub role: RoleId,
    pub action: AuditAction,
    pub resource_ref: String,
    pub pii_entities_seen: usize,
    pub pii_entities_protected: usize,
    pub access_granted: bool,
}

// ---------------------------------------------------------------------------
// EngineConfig — behavior switches the implementer must expose
// ---------------------------------------------------------------------------

/// What to do when a (role, PII type) lookup finds no rule at decision time.
/// Neither choice ever defaults toward disclosure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingRuleBehavior {
    /// Hard `Configuration` error for the request.
    Error,
    /// Conservative default: treat the entity as `no_access` and count it
    /// in `entities_denied`.
    WithholdEntity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_missing_rule")]
    pub missing_rule: MissingRuleBehavior,
    /// Risk score when 100% of entities are shown in full.
    #[serde(default = "default_baseline_risk")]
    pub baseline_risk: f64,
}

fn default_missing_rule() -> MissingRuleBehavior {
    MissingRuleBehavior::Error
}

fn default_baseline_risk() -> f64 {
    9.2
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            missing_rule: default_missing_rule(),
            baseline_risk: default_baseline_risk(),
        }
    }
}
