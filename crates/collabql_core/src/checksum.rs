//! Cross-party checksum agreement.
//!
//! Every party computes a checksum over the table schemas and column control
//! policies a query touches. Before execution each party compares what it
//! computed locally against what the other parties report so that no two
//! engines run plans derived from diverging inputs.

use std::fmt;
use std::sync::atomic::{self, AtomicU64};

use scc::hash_map::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{ChecksumSide, CompileError, Result};

/// Schema and policy digests computed for one party.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub table_schema: Vec<u8>,
    pub ccl: Vec<u8>,
}

impl Checksum {
    pub fn new(table_schema: impl Into<Vec<u8>>, ccl: impl Into<Vec<u8>>) -> Self {
        Checksum {
            table_schema: table_schema.into(),
            ccl: ccl.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.table_schema.is_empty() {
            return Err(CompileError::InvalidChecksum(
                "table schema in checksum is empty".to_string(),
            ));
        }
        if self.ccl.is_empty() {
            return Err(CompileError::InvalidChecksum(
                "ccl in checksum is empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn compare_with(&self, other: &Checksum) -> ChecksumCompareResult {
        let schema_eq = self.table_schema == other.table_schema;
        let ccl_eq = self.ccl == other.ccl;
        match (schema_eq, ccl_eq) {
            (true, true) => ChecksumCompareResult::Equal,
            (false, true) => ChecksumCompareResult::TableSchemaNotEqual,
            (true, false) => ChecksumCompareResult::CclNotEqual,
            (false, false) => ChecksumCompareResult::TableCclNotEqual,
        }
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checksum")
            .field("table_schema", &HexBytes(&self.table_schema))
            .field("ccl", &HexBytes(&self.ccl))
            .finish()
    }
}

struct HexBytes<'a>(&'a [u8]);

impl fmt::Debug for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Checksum as it arrives from a peer.
///
/// Both fields are required. A missing field is malformed input, not an empty
/// checksum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumProto {
    #[serde(default)]
    pub table_schema: Option<Vec<u8>>,
    #[serde(default)]
    pub ccl: Option<Vec<u8>>,
}

impl TryFrom<ChecksumProto> for Checksum {
    type Error = CompileError;

    fn try_from(proto: ChecksumProto) -> Result<Self> {
        let table_schema = proto.table_schema.ok_or_else(|| {
            CompileError::InvalidChecksum("missing table schema in checksum".to_string())
        })?;
        let ccl = proto
            .ccl
            .ok_or_else(|| CompileError::InvalidChecksum("missing ccl in checksum".to_string()))?;

        let checksum = Checksum { table_schema, ccl };
        checksum.validate()?;

        Ok(checksum)
    }
}

impl From<Checksum> for ChecksumProto {
    fn from(checksum: Checksum) -> Self {
        ChecksumProto {
            table_schema: Some(checksum.table_schema),
            ccl: Some(checksum.ccl),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChecksumCompareResult {
    Equal,
    TableSchemaNotEqual,
    CclNotEqual,
    TableCclNotEqual,
}

impl ChecksumCompareResult {
    pub const fn is_equal(&self) -> bool {
        matches!(self, Self::Equal)
    }
}

impl fmt::Display for ChecksumCompareResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "EQUAL"),
            Self::TableSchemaNotEqual => write!(f, "TABLE_SCHEMA_NOT_EQUAL"),
            Self::CclNotEqual => write!(f, "CCL_NOT_EQUAL"),
            Self::TableCclNotEqual => write!(f, "TABLE_CCL_NOT_EQUAL"),
        }
    }
}

/// Local and remote checksums keyed by party code.
///
/// Local checksums are the ones this party computed for a peer's context,
/// remote checksums are the ones the peer reported for itself. Each map is
/// independently concurrent, operations on one party never block another.
#[derive(Debug, Default)]
pub struct ChecksumStore {
    local: scc::HashMap<String, Checksum>,
    remote: scc::HashMap<String, Checksum>,
    mismatches: AtomicU64,
}

impl ChecksumStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_local(&self, party: &str, checksum: Checksum) -> Result<()> {
        checksum.validate()?;
        Self::store(&self.local, party, checksum);
        Ok(())
    }

    pub fn save_remote(&self, party: &str, checksum: Checksum) -> Result<()> {
        checksum.validate()?;
        Self::store(&self.remote, party, checksum);
        Ok(())
    }

    /// Convert and store a checksum reported by a peer.
    pub fn save_remote_proto(&self, party: &str, proto: ChecksumProto) -> Result<()> {
        let checksum = Checksum::try_from(proto)?;
        Self::store(&self.remote, party, checksum);
        Ok(())
    }

    pub fn get_local(&self, party: &str) -> Result<Checksum> {
        Self::load(&self.local, party, ChecksumSide::Local)
    }

    pub fn get_remote(&self, party: &str) -> Result<Checksum> {
        Self::load(&self.remote, party, ChecksumSide::Remote)
    }

    /// Compare the local and remote checksums for a party.
    ///
    /// Errors if either side hasn't been stored yet. A mismatch is returned
    /// as an outcome, the caller decides whether it aborts the session.
    pub fn compare(&self, party: &str) -> Result<ChecksumCompareResult> {
        let local = self.get_local(party)?;
        let remote = self.get_remote(party)?;

        let result = local.compare_with(&remote);
        if result.is_equal() {
            debug!(%party, "checksums equal");
        } else {
            self.mismatches.fetch_add(1, atomic::Ordering::Relaxed);
            warn!(%party, %result, ?local, ?remote, "checksum mismatch");
        }

        Ok(result)
    }

    /// Number of non-equal comparisons observed so far.
    pub fn mismatch_count(&self) -> u64 {
        self.mismatches.load(atomic::Ordering::Relaxed)
    }

    fn store(map: &scc::HashMap<String, Checksum>, party: &str, checksum: Checksum) {
        match map.entry(party.to_string()) {
            Entry::Occupied(mut ent) => {
                *ent.get_mut() = checksum;
            }
            Entry::Vacant(ent) => {
                ent.insert_entry(checksum);
            }
        }
    }

    fn load(
        map: &scc::HashMap<String, Checksum>,
        party: &str,
        side: ChecksumSide,
    ) -> Result<Checksum> {
        map.read(party, |_, v| v.clone())
            .ok_or_else(|| CompileError::ChecksumNotFound {
                side,
                party: party.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_outcomes() {
        let store = ChecksumStore::new();
        store.save_local("bob", Checksum::new("S1", "P1")).unwrap();

        store.save_remote("bob", Checksum::new("S1", "P1")).unwrap();
        assert_eq!(ChecksumCompareResult::Equal, store.compare("bob").unwrap());

        store.save_remote("bob", Checksum::new("S2", "P1")).unwrap();
        assert_eq!(
            ChecksumCompareResult::TableSchemaNotEqual,
            store.compare("bob").unwrap()
        );

        store.save_remote("bob", Checksum::new("S1", "P2")).unwrap();
        assert_eq!(
            ChecksumCompareResult::CclNotEqual,
            store.compare("bob").unwrap()
        );

        store.save_remote("bob", Checksum::new("S2", "P2")).unwrap();
        assert_eq!(
            ChecksumCompareResult::TableCclNotEqual,
            store.compare("bob").unwrap()
        );

        assert_eq!(3, store.mismatch_count());
    }

    #[test]
    fn policy_mismatch_for_carol() {
        let store = ChecksumStore::new();
        store.save_local("carol", Checksum::new("S1", "P1")).unwrap();
        store.save_remote("carol", Checksum::new("S1", "P2")).unwrap();

        assert_eq!(
            ChecksumCompareResult::CclNotEqual,
            store.compare("carol").unwrap()
        );
    }

    #[test]
    fn empty_components_rejected_without_mutation() {
        let store = ChecksumStore::new();
        store.save_local("alice", Checksum::new("S1", "P1")).unwrap();

        let err = store
            .save_local("alice", Checksum::new("", "P2"))
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidChecksum(_)));

        let err = store
            .save_remote("alice", Checksum::new("S2", ""))
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidChecksum(_)));

        assert_eq!(Checksum::new("S1", "P1"), store.get_local("alice").unwrap());
        assert!(store.get_remote("alice").is_err());
    }

    #[test]
    fn compare_missing_side() {
        let store = ChecksumStore::new();
        let err = store.compare("dave").unwrap_err();
        assert!(matches!(
            err,
            CompileError::ChecksumNotFound {
                side: ChecksumSide::Local,
                ..
            }
        ));

        store.save_local("dave", Checksum::new("S", "P")).unwrap();
        let err = store.compare("dave").unwrap_err();
        assert!(matches!(
            err,
            CompileError::ChecksumNotFound {
                side: ChecksumSide::Remote,
                ..
            }
        ));
    }

    #[test]
    fn proto_requires_both_fields() {
        let missing_ccl = ChecksumProto {
            table_schema: Some(b"S1".to_vec()),
            ccl: None,
        };
        assert!(Checksum::try_from(missing_ccl).is_err());

        let empty_schema = ChecksumProto {
            table_schema: Some(Vec::new()),
            ccl: Some(b"P1".to_vec()),
        };
        assert!(Checksum::try_from(empty_schema).is_err());

        let store = ChecksumStore::new();
        assert!(
            store
                .save_remote_proto("bob", ChecksumProto::default())
                .is_err()
        );
        store
            .save_remote_proto("bob", Checksum::new("S1", "P1").into())
            .unwrap();
        assert_eq!(Checksum::new("S1", "P1"), store.get_remote("bob").unwrap());
    }

    #[test]
    fn concurrent_parties() {
        let store = ChecksumStore::new();
        let parties: Vec<_> = (0..16).map(|i| format!("party_{i}")).collect();

        std::thread::scope(|s| {
            for party in &parties {
                let store = &store;
                s.spawn(move || {
                    for round in 0..50 {
                        let schema = format!("S{round}");
                        store
                            .save_local(party, Checksum::new(schema.clone(), "P"))
                            .unwrap();
                        store
                            .save_remote(party, Checksum::new(schema, "P"))
                            .unwrap();
                    }
                });
            }
        });

        for party in &parties {
            assert_eq!(ChecksumCompareResult::Equal, store.compare(party).unwrap());
            assert_eq!(b"S49".to_vec(), store.get_local(party).unwrap().table_schema);
        }
    }

    #[test]
    fn concurrent_writers_same_party_never_tear() {
        let store = ChecksumStore::new();

        std::thread::scope(|s| {
            for i in 0..8 {
                let store = &store;
                s.spawn(move || {
                    for _ in 0..100 {
                        let val = format!("v{i}");
                        store
                            .save_local("erin", Checksum::new(val.clone(), val))
                            .unwrap();
                    }
                });
            }
        });

        // Last write wins, but schema and ccl always come from the same write.
        let checksum = store.get_local("erin").unwrap();
        assert_eq!(checksum.table_schema, checksum.ccl);
    }
}
