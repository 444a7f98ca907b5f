use std::sync::{Arc, RwLock};

use datalens_core::{PiiType, RoleId};

use crate::error::{EngineResult, PolicyError};
use crate::types::{PathRule, PolicyRule, RuleTable};

/// Shared policy store with whole-table snapshot swap.
///
/// Readers take an `Arc` snapshot at the start of a request and evaluate
/// the entire request against it, so a concurrent `replace_all` can never
/// make one request observe rules from two table generations. The writer
/// holds the lock only for the pointer swap; readers never wait on table
/// construction or validation.
pub struct PolicyStore {
    table: RwLock<Arc<RuleTable>>,
}

impl PolicyStore {
    pub fn new(table: RuleTable) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    /// Immutable point-in-time view of the rule table.
    pub fn snapshot(&self) -> Arc<RuleTable> {
        Arc::clone(&self.table.read().expect("rule table lock poisoned"))
    }

    /// Atomically replace the whole rule table. A reader sees either the
    /// old complete table or the new complete table, never a mix. Returns
    /// the new table generation.
    pub fn replace_all(&self, mut table: RuleTable) -> u64 {
        let mut guard = self.table.write().expect("rule table lock poisoned");
        table.generation = guard.generation + 1;
        let generation = table.generation;
        *guard = Arc::new(table);
        generation
    }

    /// Look up the rule for a (role, PII type) pair. A missing entry is a
    /// configuration gap, a hard failure, never a silent default.
    pub fn get_rule(&self, role: &RoleId, pii_type: &PiiType) -> EngineResult<PolicyRule> {
        self.snapshot().rule(role, pii_type).cloned().ok_or_else(|| {
            PolicyError::Configuration(format!(
                "no rule for role '{}' and pii type '{}'",
                role, pii_type
            ))
        })
    }

    /// Look up a role's path rule, failing on a configuration gap.
    pub fn get_path_rule(&self, role: &RoleId) -> EngineResult<PathRule> {
        self.snapshot().path_rule(role).cloned().ok_or_else(|| {
            PolicyError::Configuration(format!("no path rule for role '{}'", role))
        })
    }
}
