use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("failed to find {side} checksum for party {party}")]
    ChecksumNotFound { side: ChecksumSide, party: String },

    #[error("duplicate table exists in catalog: {0}")]
    DuplicateTable(String),

    #[error("table `{0}` not found in catalog")]
    TableNotFound(String),

    #[error("no data source in query")]
    NoDataSource,

    #[error("expect select into issuer party code {expected} but got {got}")]
    IssuerMismatch { expected: String, got: String },

    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("invalid function name: `{0}`")]
    InvalidFunctionName(String),

    #[error("invalid graph: {rule}: {detail}")]
    InvalidGraph { rule: GraphRule, detail: String },

    #[error("failed to partition graph: {0}")]
    Partition(String),

    #[error("only support one query one time, but got {0} queries")]
    ParseArity(usize),

    #[error("invalid table name: `{0}`")]
    InvalidTableName(String),

    #[error("unknown db type of table {table}: {db_type}")]
    UnknownDbType { table: String, db_type: String },

    #[error("frontend: {0}")]
    Frontend(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T, E = CompileError> = std::result::Result<T, E>;

/// Which side of the checksum agreement a lookup targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumSide {
    Local,
    Remote,
}

impl fmt::Display for ChecksumSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Structural rule an execution graph violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphRule {
    UnsortedParties,
    NodeId,
    DanglingInput,
    UnknownParty,
    Cycle,
    CrossPartyEdge,
    TransferPeer,
    Output,
}

impl fmt::Display for GraphRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnsortedParties => "parties not sorted and unique",
            Self::NodeId => "node id mismatch",
            Self::DanglingInput => "dangling input",
            Self::UnknownParty => "party not a participant",
            Self::Cycle => "cycle",
            Self::CrossPartyEdge => "cross-party edge without transfer",
            Self::TransferPeer => "transfer peer",
            Self::Output => "output column",
        };
        write!(f, "{s}")
    }
}

macro_rules! internal {
    ($($arg:tt)*) => {
        crate::errors::CompileError::Internal(std::format!($($arg)*))
    };
}
pub(crate) use internal;
