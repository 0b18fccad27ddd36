//! Resolve which parties take part in a query.
//!
//! Every table the plan reads is looked up in the catalog to find its owner
//! and the physical table behind it. The owners, plus optionally the issuer,
//! become the participants of the query.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{Catalog, DbTable, RefTable};
use crate::errors::{CompileError, Result};
use crate::logical::operator::{LogicalOperator, LogicalPlan, LogicalScan};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub party_code: String,
}

/// Participants of a query, sorted by party code.
///
/// Peers compiling the same plan must derive identical graphs, so the order
/// never depends on discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartyInfo {
    participants: Vec<Participant>,
}

impl PartyInfo {
    pub fn new(participants: impl IntoIterator<Item = Participant>) -> Self {
        let mut participants: Vec<_> = participants.into_iter().collect();
        participants.sort();
        participants.dedup();
        PartyInfo { participants }
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn party_codes(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(|p| p.party_code.as_str())
    }

    pub fn contains(&self, party: &str) -> bool {
        self.participants
            .binary_search_by(|p| p.party_code.as_str().cmp(party))
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Table ownership and physical table info for a query.
#[derive(Debug, Clone, Default)]
pub struct EnginesInfo {
    party_info: PartyInfo,
    party_to_tables: BTreeMap<String, Vec<DbTable>>,
    table_to_owner: HashMap<DbTable, String>,
    table_to_refs: HashMap<DbTable, RefTable>,
    /// Database unqualified scans resolve against.
    current_db: String,
}

impl EnginesInfo {
    pub fn new(party_info: PartyInfo, party_to_tables: BTreeMap<String, Vec<DbTable>>) -> Self {
        let table_to_owner = party_to_tables
            .iter()
            .flat_map(|(party, tables)| tables.iter().map(|t| (t.clone(), party.clone())))
            .collect();

        EnginesInfo {
            party_info,
            party_to_tables,
            table_to_owner,
            table_to_refs: HashMap::new(),
            current_db: String::new(),
        }
    }

    pub fn with_current_db(mut self, current_db: impl Into<String>) -> Self {
        self.current_db = current_db.into();
        self
    }

    pub fn update_table_to_refs(&mut self, refs: impl IntoIterator<Item = (DbTable, RefTable)>) {
        self.table_to_refs.extend(refs);
    }

    pub fn party_info(&self) -> &PartyInfo {
        &self.party_info
    }

    pub fn tables_of(&self, party: &str) -> &[DbTable] {
        self.party_to_tables
            .get(party)
            .map(|tables| tables.as_slice())
            .unwrap_or(&[])
    }

    pub fn owner_of(&self, table: &DbTable) -> Option<&str> {
        self.table_to_owner.get(table).map(|s| s.as_str())
    }

    pub fn ref_table(&self, table: &DbTable) -> Option<&RefTable> {
        self.table_to_refs.get(table)
    }

    /// Qualified name of a scan in this query's session.
    pub fn scan_table(&self, scan: &LogicalScan) -> DbTable {
        scan_table(scan, &self.current_db)
    }
}

/// Collect data source scans from the plan.
///
/// Only leaves are sources, a node with children is never treated as one.
pub fn collect_data_sources(plan: &LogicalOperator) -> Vec<&LogicalScan> {
    let children = plan.children();
    if !children.is_empty() {
        return children.iter().flat_map(collect_data_sources).collect();
    }

    match plan {
        LogicalOperator::Scan(scan) => vec![&scan.node],
        _ => Vec::new(),
    }
}

/// Qualified name of a scan, defaulting to the current database.
pub fn scan_table(scan: &LogicalScan, current_db: &str) -> DbTable {
    let db_name = if scan.db_name.is_empty() {
        current_db
    } else {
        &scan.db_name
    };
    DbTable::new(db_name, scan.table_name.clone())
}

pub fn build_engines_info(
    plan: &LogicalPlan,
    catalog: &Catalog,
    current_db: &str,
    issuer: &str,
    issuer_as_participant: bool,
) -> Result<EnginesInfo> {
    let catalog_map = catalog.table_map()?;

    let sources = collect_data_sources(&plan.root);
    if sources.is_empty() {
        return Err(CompileError::NoDataSource);
    }

    let mut party_to_tables: BTreeMap<String, Vec<DbTable>> = BTreeMap::new();
    let mut table_to_refs = HashMap::new();

    for scan in sources {
        let table = scan_table(scan, current_db);
        let name = table.to_string();

        let entry = catalog_map
            .get(name.as_str())
            .ok_or_else(|| CompileError::TableNotFound(name.clone()))?;

        let tables = party_to_tables.entry(entry.owner.clone()).or_default();
        if !tables.contains(&table) {
            tables.push(table.clone());
        }

        let ref_table = entry.resolve_ref()?;
        table_to_refs.insert(table, ref_table);
    }

    let mut participants: Vec<_> = party_to_tables
        .keys()
        .map(|party| Participant {
            party_code: party.clone(),
        })
        .collect();

    if issuer_as_participant && !party_to_tables.contains_key(issuer) {
        participants.push(Participant {
            party_code: issuer.to_string(),
        });
    }

    let party_info = PartyInfo::new(participants);
    debug!(parties = ?party_info.party_codes().collect::<Vec<_>>(), "resolved participants");

    let mut info = EnginesInfo::new(party_info, party_to_tables).with_current_db(current_db);
    info.update_table_to_refs(table_to_refs);

    Ok(info)
}
