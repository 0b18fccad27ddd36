//! Catalog boundary.
//!
//! The catalog is produced by the storage layer of the issuing party and
//! describes every table the query may touch together with the party that
//! owns it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{CompileError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[serde(alias = "int", alias = "long", alias = "integer")]
    Int64,
    #[serde(alias = "float", alias = "double")]
    Float64,
    #[serde(alias = "str")]
    String,
    #[serde(alias = "boolean")]
    Bool,
    Datetime,
    Timestamp,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64 => write!(f, "int64"),
            Self::Float64 => write!(f, "float64"),
            Self::String => write!(f, "string"),
            Self::Bool => write!(f, "bool"),
            Self::Datetime => write!(f, "datetime"),
            Self::Timestamp => write!(f, "timestamp"),
        }
    }
}

/// A named column, optionally typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<DataType>,
}

impl Field {
    pub fn new(name: impl Into<String>, datatype: Option<DataType>) -> Self {
        Field {
            name: name.into(),
            datatype,
        }
    }
}

/// Storage backend behind a table.
///
/// Determines the SQL dialect used when a query fragment is pushed down to
/// the owning party's database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    #[default]
    Mysql,
    Postgresql,
    Sqlite,
    Csvdb,
    Odps,
    Hive,
}

impl DbType {
    pub const fn supports_full_outer_join(&self) -> bool {
        !matches!(self, Self::Mysql)
    }

    /// Quote an identifier for this dialect.
    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            Self::Mysql | Self::Odps | Self::Hive => {
                format!("`{}`", ident.replace('`', "``"))
            }
            Self::Postgresql | Self::Sqlite | Self::Csvdb => {
                format!("\"{}\"", ident.replace('"', "\"\""))
            }
        }
    }
}

impl FromStr for DbType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            // Tables registered without a backend are served by the default.
            "" | "mysql" => Self::Mysql,
            "postgresql" | "postgres" => Self::Postgresql,
            "sqlite" => Self::Sqlite,
            "csvdb" => Self::Csvdb,
            "odps" => Self::Odps,
            "hive" => Self::Hive,
            other => return Err(other.to_string()),
        })
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mysql => write!(f, "mysql"),
            Self::Postgresql => write!(f, "postgresql"),
            Self::Sqlite => write!(f, "sqlite"),
            Self::Csvdb => write!(f, "csvdb"),
            Self::Odps => write!(f, "odps"),
            Self::Hive => write!(f, "hive"),
        }
    }
}

/// Database qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DbTable {
    pub db_name: String,
    pub table_name: String,
}

impl DbTable {
    pub fn new(db_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        DbTable {
            db_name: db_name.into(),
            table_name: table_name.into(),
        }
    }

    /// Render the name with each part quoted for the given dialect.
    pub fn quoted(&self, db_type: DbType) -> String {
        if self.db_name.is_empty() {
            db_type.quote_ident(&self.table_name)
        } else {
            format!(
                "{}.{}",
                db_type.quote_ident(&self.db_name),
                db_type.quote_ident(&self.table_name)
            )
        }
    }
}

impl FromStr for DbTable {
    type Err = CompileError;

    /// Parse either `db.table` or a bare `table`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<_> = s.split('.').collect();
        match parts.as_slice() {
            [table] if !table.is_empty() => Ok(DbTable::new("", *table)),
            [db, table] if !db.is_empty() && !table.is_empty() => Ok(DbTable::new(*db, *table)),
            _ => Err(CompileError::InvalidTableName(s.to_string())),
        }
    }
}

impl fmt::Display for DbTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.db_name.is_empty() {
            write!(f, "{}", self.table_name)
        } else {
            write!(f, "{}.{}", self.db_name, self.table_name)
        }
    }
}

/// Physical table backing a logical table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefTable {
    pub table: DbTable,
    pub db_type: DbType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDesc {
    pub name: String,
    #[serde(rename = "type")]
    pub dtype: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    /// Qualified `db.table` name the query refers to.
    pub table_name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDesc>,
    /// Party code of the owner.
    pub owner: String,
    /// Underlying table in the owner's storage. Empty means the table itself.
    #[serde(default)]
    pub ref_table: String,
    #[serde(default)]
    pub db_type: String,
}

impl TableEntry {
    /// Resolve the physical table for this entry.
    pub fn resolve_ref(&self) -> Result<RefTable> {
        let name = if self.ref_table.is_empty() {
            &self.table_name
        } else {
            &self.ref_table
        };
        let table: DbTable = name.parse()?;
        let db_type = self
            .db_type
            .parse()
            .map_err(|db_type| CompileError::UnknownDbType {
                table: self.table_name.clone(),
                db_type,
            })?;

        Ok(RefTable { table, db_type })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub tables: Vec<TableEntry>,
}

impl Catalog {
    pub fn new(tables: impl IntoIterator<Item = TableEntry>) -> Self {
        Catalog {
            tables: tables.into_iter().collect(),
        }
    }

    /// Index entries by qualified name, rejecting duplicates.
    pub fn table_map(&self) -> Result<HashMap<&str, &TableEntry>> {
        let mut map = HashMap::with_capacity(self.tables.len());
        for entry in &self.tables {
            if map.insert(entry.table_name.as_str(), entry).is_some() {
                return Err(CompileError::DuplicateTable(entry.table_name.clone()));
            }
        }
        Ok(map)
    }

    /// Check every entry is named `db.table` and no name repeats.
    pub fn validate(&self) -> Result<()> {
        for entry in &self.tables {
            let table: DbTable = entry.table_name.parse()?;
            if table.db_name.is_empty() {
                return Err(CompileError::InvalidTableName(entry.table_name.clone()));
            }
        }
        self.table_map()?;
        Ok(())
    }
}
