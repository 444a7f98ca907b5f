use thiserror::Error;

/// Single error enum for all policy engine operations.
///
/// Display implementations never echo entity text, so PII cannot leak
/// through error messages. Access denial is deliberately NOT an error
/// variant: a denial is a normal decision outcome (`AccessDecision`),
/// and callers must always be able to tell "this role may not do this"
/// (4xx-class) apart from "the system is misconfigured" (5xx-class).
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Missing or malformed rule material: a (role, PII type) gap, a
    /// non-total table, a partial rule without a mask, a band list that
    /// does not cover an observed value. Retrying without fixing the
    /// table reproduces the same failure.
    #[error("policy configuration error: {0}")]
    Configuration(String),

    /// Malformed PII entity input, e.g. a non-numeric value under a band
    /// rule. One invalid entity fails the whole request.
    #[error("invalid '{pii_type}' entity: {reason}")]
    InvalidEntity { pii_type: String, reason: String },

    #[error("audit sink error: {0}")]
    AuditSink(String),
}

pub type EngineResult<T> = Result<T, PolicyError>;
