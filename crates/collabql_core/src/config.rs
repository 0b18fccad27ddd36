use serde::{Deserialize, Serialize};

/// Default upper bound on workers per party.
///
/// A constant rather than the host's core count so that every peer derives
/// the same schedule.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Default minimum group size for revealing grouped aggregates.
pub const DEFAULT_GROUP_BY_THRESHOLD: u64 = 4;

/// Options for a single compile request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Attach a graphviz rendering of the execution graph to the plan.
    pub dump_exe_graph: bool,
    /// Upper bound on workers per party.
    pub max_workers: usize,
    pub security: SecurityConfig,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            dump_exe_graph: false,
            max_workers: DEFAULT_MAX_WORKERS,
            security: SecurityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Groups with fewer rows than this are not revealed. Values of 0 or 1
    /// disable the check.
    pub group_by_threshold: u64,
    /// Allow revealing the group mark of a grouped aggregate.
    pub reveal_group_mark: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            group_by_threshold: DEFAULT_GROUP_BY_THRESHOLD,
            reveal_group_mark: false,
        }
    }
}

impl SecurityConfig {
    /// Threshold to enforce on grouped aggregates, if any.
    pub fn effective_group_threshold(&self) -> Option<u64> {
        (self.group_by_threshold > 1).then_some(self.group_by_threshold)
    }
}
