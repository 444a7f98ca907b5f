use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use datalens_core::{PiiType, RoleId, SourceId};

use crate::error::{EngineResult, PolicyError};
use crate::types::{Action, Band, MaskStrategy, PathRule, PolicyRule, RuleParams, RuleTable};

/// Maximum accepted rule-table document size.
const MAX_TABLE_BYTES: usize = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// On-the-wire rule table document.
///
/// `pii_types` declares the type universe. Every role must carry a rule for
/// every declared type: the table is a total function, checked at load.
/// Loading an incomplete table fails with the full gap list; nothing ever
/// defaults at lookup time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTableSpec {
    pub pii_types: Vec<PiiType>,
    pub roles: BTreeMap<RoleId, RoleSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub rules: BTreeMap<PiiType, RuleSpec>,
    pub paths: PathSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<MaskStrategy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bands: Vec<Band>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentinel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSpec {
    pub allowed_globs: Vec<String>,
    pub allowed_sources: Vec<SourceId>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parse and validate a rule table from raw JSON bytes.
pub fn load_rule_table(data: &[u8]) -> EngineResult<RuleTable> {
    if data.is_empty() {
        return Err(PolicyError::Configuration(
            "rule table data is empty".to_string(),
        ));
    }
    if data.len() > MAX_TABLE_BYTES {
        return Err(PolicyError::Configuration(format!(
            "rule table data exceeds {} byte limit",
            MAX_TABLE_BYTES
        )));
    }

    let json = std::str::from_utf8(data).map_err(|_| {
        PolicyError::Configuration("rule table data is not valid UTF-8".to_string())
    })?;
    let spec: RuleTableSpec = serde_json::from_str(json)
        .map_err(|e| PolicyError::Configuration(format!("rule table parse error: {}", e)))?;

    build_rule_table(&spec)
}

/// Serialize a rule table document to pretty JSON for export.
pub fn save_rule_table(spec: &RuleTableSpec) -> EngineResult<Vec<u8>> {
    serde_json::to_vec_pretty(spec)
        .map_err(|e| PolicyError::Configuration(format!("rule table serialize error: {}", e)))
}

/// Validate a parsed document and build the immutable table.
///
/// Collects every violation before failing, so one load attempt reports the
/// whole gap list rather than the first hole.
pub fn build_rule_table(spec: &RuleTableSpec) -> EngineResult<RuleTable> {
    let mut errors = validate_spec(spec);
    if !errors.is_empty() {
        errors.sort();
        return Err(PolicyError::Configuration(errors.join("; ")));
    }

    let mut table = RuleTable {
        generation: 1,
        pii_types: spec.pii_types.clone(),
        rules: HashMap::new(),
        path_rules: HashMap::new(),
    };

    for (role, role_spec) in &spec.roles {
        let by_type: HashMap<PiiType, PolicyRule> = role_spec
            .rules
            .iter()
            .map(|(pii_type, rule)| {
                (
                    pii_type.clone(),
                    PolicyRule {
                        role: role.clone(),
                        pii_type: pii_type.clone(),
                        action: rule.action,
                        params: RuleParams {
                            mask: rule.mask.clone(),
                            bands: rule.bands.clone(),
                            sentinel: rule.sentinel.clone(),
                        },
                    },
                )
            })
            .collect();
        table.rules.insert(role.clone(), by_type);
        table.path_rules.insert(
            role.clone(),
            PathRule {
                role: role.clone(),
                allowed_globs: role_spec.paths.allowed_globs.clone(),
                allowed_sources: role_spec.paths.allowed_sources.clone(),
            },
        );
    }

    tracing::info!(
        roles = table.rules.len(),
        pii_types = table.pii_types.len(),
        "rule table validated"
    );
    Ok(table)
}

fn validate_spec(spec: &RuleTableSpec) -> Vec<String> {
    let mut errors = Vec::new();

    if spec.pii_types.is_empty() {
        errors.push("no pii types declared".to_string());
    }
    let mut seen_types = std::collections::HashSet::new();
    for pii_type in &spec.pii_types {
        if pii_type.as_str().is_empty() {
            errors.push("pii type name must not be empty".to_string());
        } else if !seen_types.insert(pii_type) {
            errors.push(format!("duplicate pii type '{}'", pii_type));
        }
    }

    if spec.roles.is_empty() {
        errors.push("no roles declared".to_string());
    }

    for (role, role_spec) in &spec.roles {
        if role.as_str().is_empty() {
            errors.push("role name must not be empty".to_string());
        }

        // Totality: one rule per declared pii type, nothing undeclared.
        for pii_type in &spec.pii_types {
            if !role_spec.rules.contains_key(pii_type) {
                errors.push(format!(
                    "role '{}' has no rule for pii type '{}'",
                    role, pii_type
                ));
            }
        }
        for pii_type in role_spec.rules.keys() {
            if !spec.pii_types.contains(pii_type) {
                errors.push(format!(
                    "role '{}' has a rule for undeclared pii type '{}'",
                    role, pii_type
                ));
            }
        }

        for (pii_type, rule) in &role_spec.rules {
            validate_rule(role, pii_type, rule, &mut errors);
        }

        for glob in &role_spec.paths.allowed_globs {
            if glob.is_empty() {
                errors.push(format!("role '{}' has an empty path glob", role));
            }
        }
        for source in &role_spec.paths.allowed_sources {
            if source.as_str().is_empty() {
                errors.push(format!("role '{}' has an empty source id", role));
            }
        }
    }

    errors
}

fn validate_rule(role: &RoleId, pii_type: &PiiType, rule: &RuleSpec, errors: &mut Vec<String>) {
    let at = format!("role '{}', pii type '{}'", role, pii_type);

    match rule.action {
        Action::Partial => {
            if rule.mask.is_none() {
                errors.push(format!("{}: partial action requires a mask strategy", at));
            }
        }
        Action::Band => {
            validate_bands(&at, &rule.bands, errors);
        }
        Action::Show | Action::Redact | Action::NoAccess => {}
    }

    if rule.mask.is_some() && rule.action != Action::Partial {
        errors.push(format!("{}: mask configured but action is not partial", at));
    }
    if !rule.bands.is_empty() && rule.action != Action::Band {
        errors.push(format!("{}: bands configured but action is not band", at));
    }
    if rule.sentinel.is_some() && rule.action != Action::Redact {
        errors.push(format!(
            "{}: sentinel configured but action is not redact",
            at
        ));
    }
}

fn validate_bands(at: &str, bands: &[Band], errors: &mut Vec<String>) {
    if bands.is_empty() {
        errors.push(format!("{}: band action requires a non-empty band list", at));
        return;
    }
    for band in bands {
        if band.upper <= band.lower {
            errors.push(format!(
                "{}: band '{}' has upper bound <= lower bound",
                at, band.label
            ));
        }
        if band.label.is_empty() {
            errors.push(format!("{}: band label must not be empty", at));
        }
    }
    for pair in bands.windows(2) {
        if pair[1].lower < pair[0].lower {
            errors.push(format!("{}: bands must be ordered by lower bound", at));
        } else if pair[1].lower < pair[0].upper {
            errors.push(format!(
                "{}: bands '{}' and '{}' overlap",
                at, pair[0].label, pair[1].label
            ));
        }
    }
}
