use sha2::{Digest, Sha256};
use std::sync::Mutex;

use crate::types::AuditEntry;

// ---------------------------------------------------------------------------
// AuditSink trait — audit entry emission boundary
// ---------------------------------------------------------------------------

/// Trait for receiving audit entries.
///
/// The engine emits exactly one entry per invocation, success or failure,
/// and the sink must accept it before the triggering operation returns.
/// Persistence and rotation are the sink implementer's concern.
pub trait AuditSink: Send + Sync {
    fn emit(&self, entry: &AuditEntry) -> Result<(), String>;
}

/// In-memory audit sink for testing.
#[derive(Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .expect("audit sink lock poisoned")
            .clone()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("audit sink lock poisoned")
            .clear();
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, entry: &AuditEntry) -> Result<(), String> {
        self.entries
            .lock()
            .map_err(|_| "audit sink lock poisoned".to_string())?
            .push(entry.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChainedAuditSink — tamper-evident append-only chain
// ---------------------------------------------------------------------------

/// One link of the audit chain: the entry plus the chained hash.
#[derive(Debug, Clone)]
pub struct AuditLink {
    pub entry: AuditEntry,
    pub hash: [u8; 32],
}

/// Hash-chained append-only audit sink.
///
/// Each link's hash covers the previous link's hash plus the entry's
/// canonical JSON encoding, so truncation, reordering or in-place edits are
/// detectable by replaying the chain from the genesis entry.
#[derive(Default)]
pub struct ChainedAuditSink {
    links: Mutex<Vec<AuditLink>>,
}

impl ChainedAuditSink {
    pub fn new() -> Self {
        Self {
            links: Mutex::new(Vec::new()),
        }
    }

    fn compute_hash(entry: &AuditEntry, previous: Option<&[u8; 32]>) -> Result<[u8; 32], String> {
        let mut hasher = Sha256::new();

        if let Some(prev) = previous {
            hasher.update(prev);
        }

        let body = serde_json::to_vec(entry)
            .map_err(|e| format!("audit entry serialize failed: {}", e))?;
        hasher.update(&body);

        let digest = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        Ok(hash)
    }

    pub fn links(&self) -> Vec<AuditLink> {
        self.links.lock().expect("audit chain lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.links.lock().expect("audit chain lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hex-encoded hash of the newest link, if any.
    pub fn head_hash_hex(&self) -> Option<String> {
        self.links
            .lock()
            .expect("audit chain lock poisoned")
            .last()
            .map(|link| hex::encode(link.hash))
    }

    /// Replay the chain from genesis and recompute every hash.
    /// Returns false if any link has been edited, dropped or reordered.
    pub fn verify_chain(&self) -> bool {
        let links = self.links.lock().expect("audit chain lock poisoned");
        let mut previous: Option<[u8; 32]> = None;
        for link in links.iter() {
            let expected = match Self::compute_hash(&link.entry, previous.as_ref()) {
                Ok(hash) => hash,
                Err(_) => return false,
            };
            if expected != link.hash {
                return false;
            }
            previous = Some(link.hash);
        }
        true
    }
}

impl AuditSink for ChainedAuditSink {
    fn emit(&self, entry: &AuditEntry) -> Result<(), String> {
        let mut links = self
            .links
            .lock()
            .map_err(|_| "audit chain lock poisoned".to_string())?;
        let previous = links.last().map(|link| link.hash);
        let hash = Self::compute_hash(entry, previous.as_ref())?;
        links.push(AuditLink {
            entry: entry.clone(),
            hash,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuditAction;
    use datalens_core::{RoleId, Timestamp};

    fn make_entry(seconds: u64, role: &str) -> AuditEntry {
        AuditEntry {
            timestamp: Timestamp::from_seconds(seconds),
            role: RoleId::new(role),
            action: AuditAction::Query,
            resource_ref: "/HR/salaries.csv".into(),
            pii_entities_seen: 8,
            pii_entities_protected: 6,
            access_granted: true,
        }
    }

    #[test]
    fn test_in_memory_sink_records_entries() {
        let sink = InMemoryAuditSink::new();
        sink.emit(&make_entry(1_000, "admin")).unwrap();
        sink.emit(&make_entry(1_001, "intern")).unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role.as_str(), "admin");
        assert_eq!(entries[1].role.as_str(), "intern");

        sink.clear();
        assert!(sink.entries().is_empty());
    }

    #[test]
    fn test_chained_sink_appends_links() {
        let sink = ChainedAuditSink::new();
        assert!(sink.is_empty());
        assert!(sink.head_hash_hex().is_none());

        sink.emit(&make_entry(1_000, "admin")).unwrap();
        sink.emit(&make_entry(1_001, "hr_manager")).unwrap();

        assert_eq!(sink.len(), 2);
        let head = sink.head_hash_hex().unwrap();
        assert_eq!(head.len(), 64);
    }

    #[test]
    fn test_chain_verifies_when_untouched() {
        let sink = ChainedAuditSink::new();
        for i in 0..10 {
            sink.emit(&make_entry(1_000 + i, "admin")).unwrap();
        }
        assert!(sink.verify_chain());
    }

    #[test]
    fn test_empty_chain_verifies() {
        let sink = ChainedAuditSink::new();
        assert!(sink.verify_chain());
    }

    #[test]
    fn test_chain_detects_edited_entry() {
        let sink = ChainedAuditSink::new();
        sink.emit(&make_entry(1_000, "admin")).unwrap();
        sink.emit(&make_entry(1_001, "admin")).unwrap();

        {
            let mut links = sink.links.lock().unwrap();
            links[0].entry.access_granted = false;
        }
        assert!(!sink.verify_chain());
    }

    #[test]
    fn test_chain_detects_reordering() {
        let sink = ChainedAuditSink::new();
        sink.emit(&make_entry(1_000, "admin")).unwrap();
        sink.emit(&make_entry(1_001, "intern")).unwrap();

        {
            let mut links = sink.links.lock().unwrap();
            links.swap(0, 1);
        }
        assert!(!sink.verify_chain());
    }

    #[test]
    fn test_chain_hash_depends_on_previous_link() {
        let first = ChainedAuditSink::new();
        first.emit(&make_entry(1_000, "admin")).unwrap();
        first.emit(&make_entry(1_001, "admin")).unwrap();

        let second = ChainedAuditSink::new();
        second.emit(&make_entry(1_001, "admin")).unwrap();

        // Same entry, different predecessor: different hash.
        assert_ne!(
            hex::encode(first.links()[1].hash),
            hex::encode(second.links()[0].hash)
        );
    }

    #[test]
    fn test_chain_hash_is_deterministic() {
        let entry = make_entry(1_000, "admin");
        let a = ChainedAuditSink::compute_hash(&entry, None).unwrap();
        let b = ChainedAuditSink::compute_hash(&entry, None).unwrap();
        assert_eq!(a, b);
    }
}
