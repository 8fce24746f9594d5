// SPDX-License-Identifier: MIT OR Apache-2.0
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;

use sigcheck_core::catalog::CatalogIndex;
use sigcheck_core::config::{Config, ModuleScope};
use sigcheck_core::model::Module;
use sigcheck_core::orchestrator::Orchestrator;
use sigcheck_core::provider::{default_manifest_path, FlatFileMemoryProvider};
use sigcheck_core::ModuleVerdict;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Output {
    Human,
    Json,
    JsonPretty,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the flat physical memory image
    #[arg(long)]
    memory: PathBuf,
    /// Path to the JSON manifest describing file objects, processes,
    /// drivers and section snapshots (defaults to `<memory>` with its
    /// extension replaced by `manifest.json`)
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Directory containing `.cat` catalog files (default `catroot/<profile>`)
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// CA trust directory for the CMS verifier
    #[arg(long, default_value = "ca")]
    ca_dir: PathBuf,
    /// Verify each process's main executable and its loaded DLLs
    #[arg(long, conflicts_with = "sys")]
    dll: bool,
    /// Verify kernel drivers instead of user-mode processes
    #[arg(long, conflicts_with = "dll")]
    sys: bool,
    /// Active profile tag, used to select a frequent-address table row and
    /// the default catalog directory
    #[arg(long, default_value = "Win10x64")]
    profile: String,
    /// Path to `addresses.json` (frequent image-base candidates)
    #[arg(long, default_value = "addresses.json")]
    addresses: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = Output::Human)]
    format: Output,
}

impl ValidateArgs {
    pub fn run(self) -> Result<()> {
        let scope = if self.sys {
            ModuleScope::Drivers
        } else if self.dll {
            ModuleScope::ExeAndDlls
        } else {
            ModuleScope::ExeOnly
        };

        let catalog_dir = self
            .catalog
            .unwrap_or_else(|| PathBuf::from("catroot").join(&self.profile));
        let manifest_path = self
            .manifest
            .unwrap_or_else(|| default_manifest_path(&self.memory));

        let config = Config::load(
            catalog_dir.clone(),
            self.ca_dir,
            scope,
            self.profile,
            &self.addresses,
        )
        .context("load configuration")?;

        let catalog = CatalogIndex::build(&catalog_dir)
            .with_context(|| format!("build catalog index from {}", catalog_dir.display()))?;
        let provider = FlatFileMemoryProvider::open(&self.memory, &manifest_path)
            .context("open memory image and manifest")?;

        let mut orchestrator = Orchestrator::new(&config, &catalog, &provider);
        let results = orchestrator.run().context("run validation orchestrator")?;

        match self.format {
            Output::Human => print_human(&results)?,
            Output::Json => {
                let rows: Vec<Row> = results.iter().map(Row::from_pair).collect();
                serde_json::to_writer(io::stdout(), &rows)?;
                io::stdout().write_all(b"\n")?;
            }
            Output::JsonPretty => {
                let rows: Vec<Row> = results.iter().map(Row::from_pair).collect();
                serde_json::to_writer_pretty(io::stdout(), &rows)?;
                io::stdout().write_all(b"\n")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct Row {
    module: String,
    owner_id: u64,
    code: Option<u8>,
    signed: bool,
    message: String,
}

impl Row {
    fn from_pair((module, verdict): &(Module, ModuleVerdict)) -> Self {
        Row {
            module: module.full_path.clone(),
            owner_id: module.owner_id,
            code: verdict.numeric_code(),
            signed: verdict.is_success(),
            message: verdict.message(),
        }
    }
}

fn print_human(results: &[(Module, ModuleVerdict)]) -> Result<()> {
    let mut out = io::BufWriter::new(io::stdout());
    for (module, verdict) in results {
        let code = verdict
            .numeric_code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let mark = if verdict.is_success() { "OK" } else { "--" };
        writeln!(out, "[{mark}] {:>2}  {}  {}", code, module.full_path, verdict.message())?;
    }
    out.flush()?;
    Ok(())
}
