use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use collabql_core::catalog::Catalog;
use collabql_core::checksum::{Checksum, ChecksumCompareResult, ChecksumProto, ChecksumStore};
use collabql_core::compiler::frontend::JsonPlanFrontend;
use collabql_core::config::CompileOptions;
use collabql_core::{CompileRequest, Compiler};
use serde::Deserialize;
use tracing::info;

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a query request into per-party execution plans.
    Compile(CompileArgs),
    /// Compare local and remote checksums for every party in a file.
    CompareChecksums(CompareChecksumsArgs),
}

impl Commands {
    pub fn run(self) -> Result<()> {
        match self {
            Commands::Compile(args) => args.run(),
            Commands::CompareChecksums(args) => args.run(),
        }
    }
}

trait RunCommand {
    fn run(self) -> Result<()>;
}

#[derive(Parser)]
pub struct CompileArgs {
    /// JSON file holding the compile request.
    pub request: PathBuf,

    /// Attach a graphviz rendering of the execution graph.
    #[clap(long)]
    pub dump_graph: bool,

    /// Upper bound on workers per party.
    #[clap(long)]
    pub max_workers: Option<usize>,
}

/// Compile request as read from disk.
///
/// `query` is either the query text or a logical plan given inline.
#[derive(Debug, Deserialize)]
struct CompileInput {
    query: serde_json::Value,
    #[serde(default)]
    db_name: String,
    issuer: String,
    #[serde(default)]
    issuer_as_participant: bool,
    catalog: Catalog,
    #[serde(default)]
    options: CompileOptions,
}

impl RunCommand for CompileArgs {
    fn run(self) -> Result<()> {
        let input: CompileInput = read_json(&self.request)?;

        let mut options = input.options;
        if self.dump_graph {
            options.dump_exe_graph = true;
        }
        if let Some(max_workers) = self.max_workers {
            options.max_workers = max_workers;
        }

        let query = match input.query {
            serde_json::Value::String(s) => s,
            plan => plan.to_string(),
        };
        let request = CompileRequest {
            query,
            db_name: input.db_name,
            issuer: input.issuer,
            issuer_as_participant: input.issuer_as_participant,
            catalog: input.catalog,
        };

        let plan = Compiler::new(options).compile(&JsonPlanFrontend, &request)?;
        info!(parties = ?plan.parties, "compiled");

        println!("{}", serde_json::to_string_pretty(&plan)?);
        Ok(())
    }
}

#[derive(Parser)]
pub struct CompareChecksumsArgs {
    /// JSON file with `local` and `remote` checksums keyed by party code.
    pub file: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct ChecksumInput {
    #[serde(default)]
    table_schema: Option<String>,
    #[serde(default)]
    ccl: Option<String>,
}

impl From<ChecksumInput> for ChecksumProto {
    fn from(input: ChecksumInput) -> Self {
        ChecksumProto {
            table_schema: input.table_schema.map(String::into_bytes),
            ccl: input.ccl.map(String::into_bytes),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChecksumsFile {
    #[serde(default)]
    local: BTreeMap<String, ChecksumInput>,
    #[serde(default)]
    remote: BTreeMap<String, ChecksumInput>,
}

impl RunCommand for CompareChecksumsArgs {
    fn run(self) -> Result<()> {
        let file: ChecksumsFile = read_json(&self.file)?;
        let parties: BTreeSet<_> = file.local.keys().chain(file.remote.keys()).cloned().collect();

        let store = ChecksumStore::new();
        for (party, input) in file.local {
            let checksum = Checksum::try_from(ChecksumProto::from(input))
                .with_context(|| format!("local checksum for {party}"))?;
            store.save_local(&party, checksum)?;
        }
        for (party, input) in file.remote {
            store
                .save_remote_proto(&party, input.into())
                .with_context(|| format!("remote checksum for {party}"))?;
        }

        let mut results: BTreeMap<String, ChecksumCompareResult> = BTreeMap::new();
        for party in parties {
            let result = store.compare(&party)?;
            results.insert(party, result);
        }
        info!(mismatches = store.mismatch_count(), "compared checksums");

        println!("{}", serde_json::to_string_pretty(&results)?);
        Ok(())
    }
}

fn read_json<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}
