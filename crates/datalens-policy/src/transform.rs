use datalens_core::RoleId;

use crate::error::{EngineResult, PolicyError};
use crate::types::{
    Action, Band, EngineConfig, MaskFill, MaskStrategy, MissingRuleBehavior, PiiEntity,
    PolicyRule, RuleTable, TransformedEntity,
};

/// Default sentinel for `redact` rules without a type-specific override.
pub const REDACT_SENTINEL: &str = "[REDACTED]";

/// Apply one rule to one entity.
///
/// Deterministic: the same (rule, entity) pair always yields the same
/// output text. `NoAccess` entities come back flagged with an empty output;
/// the engine drops them from the result and counts them as denied.
pub fn transform(rule: &PolicyRule, entity: &PiiEntity) -> EngineResult<TransformedEntity> {
    let output_text = match rule.action {
        Action::Show => entity.original_text.clone(),
        Action::Redact => rule
            .params
            .sentinel
            .clone()
            .unwrap_or_else(|| REDACT_SENTINEL.to_string()),
        Action::Partial => {
            let mask = rule.params.mask.as_ref().ok_or_else(|| {
                PolicyError::Configuration(format!(
                    "partial rule for role '{}' and pii type '{}' has no mask strategy",
                    rule.role, rule.pii_type
                ))
            })?;
            apply_mask(mask, &entity.original_text)
        }
        Action::Band => band_label(&rule.params.bands, entity)?,
        Action::NoAccess => String::new(),
    };

    Ok(TransformedEntity {
        pii_type: entity.pii_type.clone(),
        span: entity.span,
        output_text,
        action_applied: rule.action,
    })
}

/// Resolve the (role, PII type) rule from the table and transform,
/// honoring the conservative default for missing rules.
pub fn transform_with(
    table: &RuleTable,
    config: &EngineConfig,
    role: &RoleId,
    entity: &PiiEntity,
) -> EngineResult<TransformedEntity> {
    match table.rule(role, &entity.pii_type) {
        Some(rule) => transform(rule, entity),
        None => match config.missing_rule {
            MissingRuleBehavior::Error => Err(PolicyError::Configuration(format!(
                "no rule for role '{}' and pii type '{}'",
                role, entity.pii_type
            ))),
            MissingRuleBehavior::WithholdEntity => {
                tracing::warn!(
                    role = role.as_str(),
                    pii_type = entity.pii_type.as_str(),
                    "no rule for entity; withholding under conservative default"
                );
                Ok(TransformedEntity {
                    pii_type: entity.pii_type.clone(),
                    span: entity.span,
                    output_text: String::new(),
                    action_applied: Action::NoAccess,
                })
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Partial masking
// ---------------------------------------------------------------------------

fn apply_mask(strategy: &MaskStrategy, text: &str) -> String {
    match strategy {
        MaskStrategy::PrefixKeep {
            keep,
            preserve_from,
            fill,
        } => {
            let chars: Vec<char> = text.chars().collect();
            let keep = (*keep).min(chars.len());
            let head: String = chars[..keep].iter().collect();

            // Everything from preserve_from's first occurrence (after the
            // kept prefix) survives verbatim, e.g. an email domain.
            let tail_start = preserve_from
                .and_then(|marker| {
                    chars[keep..]
                        .iter()
                        .position(|&c| c == marker)
                        .map(|offset| keep + offset)
                })
                .unwrap_or(chars.len());
            let tail: String = chars[tail_start..].iter().collect();

            format!("{}{}{}", head, render_fill(&chars[keep..tail_start], *fill), tail)
        }
        MaskStrategy::SuffixKeep { keep, fill } => {
            let chars: Vec<char> = text.chars().collect();
            let alnum_total = chars.iter().filter(|c| c.is_alphanumeric()).count();
            let to_mask = alnum_total.saturating_sub(*keep);

            match fill {
                MaskFill::PerChar => {
                    let mut masked = 0usize;
                    chars
                        .iter()
                        .map(|&c| {
                            if c.is_alphanumeric() && masked < to_mask {
                                masked += 1;
                                '*'
                            } else {
                                c
                            }
                        })
                        .collect()
                }
                MaskFill::Fixed(n) => {
                    if to_mask == 0 {
                        return text.to_string();
                    }
                    // Collapse everything before the kept suffix.
                    let mut seen = 0usize;
                    let suffix_start = chars
                        .iter()
                        .position(|c| {
                            if c.is_alphanumeric() {
                                seen += 1;
                                seen > to_mask
                            } else {
                                false
                            }
                        })
                        .unwrap_or(chars.len());
                    let suffix: String = chars[suffix_start..].iter().collect();
                    format!("{}{}", "*".repeat(*n as usize), suffix)
                }
            }
        }
        MaskStrategy::FixedSentinel { length } => "*".repeat(*length),
    }
}

fn render_fill(masked: &[char], fill: MaskFill) -> String {
    match fill {
        MaskFill::PerChar => masked
            .iter()
            .map(|&c| if c.is_alphanumeric() { '*' } else { c })
            .collect(),
        MaskFill::Fixed(n) => "*".repeat(n as usize),
    }
}

// ---------------------------------------------------------------------------
// Band bucketing
// ---------------------------------------------------------------------------

fn band_label(bands: &[Band], entity: &PiiEntity) -> EngineResult<String> {
    if bands.is_empty() {
        return Err(PolicyError::Configuration(format!(
            "band rule for pii type '{}' has an empty band list",
            entity.pii_type
        )));
    }

    let value = parse_numeric(&entity.original_text).ok_or_else(|| PolicyError::InvalidEntity {
        pii_type: entity.pii_type.to_string(),
        reason: "value is not numeric".to_string(),
    })?;

    // Half-open buckets: lower <= value < upper. A value outside every
    // bucket is a coverage gap in the table, never clamped.
    bands
        .iter()
        .find(|band| band.contains(value))
        .map(|band| band.label.clone())
        .ok_or_else(|| {
            PolicyError::Configuration(format!(
                "band list for pii type '{}' does not cover the observed value",
                entity.pii_type
            ))
        })
}

/// Parse a numeric value, tolerating currency decoration (`$125,000`).
fn parse_numeric(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '_') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        cleaned.parse().ok()
    }
}
