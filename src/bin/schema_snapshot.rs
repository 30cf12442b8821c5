//! Schema Snapshot CLI
//!
//! Inspect, verify and maintain registry snapshot files offline.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use master_schemas::accounting::{self, charged_usage_by_account};
use master_schemas::{logging, snapshot, JsonRenderer, SchemaId, SchemaRegistry, SchemasConfig};

#[derive(Parser)]
#[command(name = "schema-snapshot")]
#[command(about = "Inspect and maintain schema registry snapshots")]
struct Cli {
    /// Config file (defaults to schemas.toml lookup)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print objects, accounts and charged usage of a snapshot
    Inspect {
        /// Snapshot file (defaults to the configured path)
        file: Option<PathBuf>,
    },

    /// Fully load a snapshot and check every invariant
    Verify {
        file: Option<PathBuf>,
    },

    /// Print the rendered form of one schema
    Render {
        /// Schema id, e.g. 0x2a
        id: String,
        file: Option<PathBuf>,
        /// Indent the output
        #[arg(long)]
        pretty: bool,
    },

    /// Recompute charged memory with the configured cost model
    Reconcile {
        file: Option<PathBuf>,
        /// Write the reconciled snapshot back
        #[arg(long)]
        write: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match SchemasConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&config.logging);

    if let Err(e) = run(cli.command, &config) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load(file: Option<PathBuf>, config: &SchemasConfig, pretty: bool) -> anyhow::Result<(SchemaRegistry, PathBuf)> {
    let path = file.unwrap_or_else(|| config.snapshot_path());
    let mut registry = SchemaRegistry::with_renderer(Arc::new(JsonRenderer::new(pretty)));
    snapshot::load_from_path(&mut registry, &path)
        .with_context(|| format!("loading {}", path.display()))?;
    Ok((registry, path))
}

fn run(command: Commands, config: &SchemasConfig) -> anyhow::Result<()> {
    match command {
        Commands::Inspect { file } => {
            let (registry, path) = load(file, config, false)?;
            let stats = registry.stats();
            println!("📦 {}", path.display());
            println!("  objects:    {}", stats.objects);
            println!("  accounts:   {}", stats.accounts);
            println!("  references: {}", stats.total_refs);
            println!("  next id:    {:#x}", stats.next_id);

            for object in registry.iter() {
                println!(
                    "  {} columns={} refs={}",
                    object.id(),
                    object.content().columns.len(),
                    object.total_ref_count()
                );
            }

            println!("  charged usage:");
            for (account, usage) in charged_usage_by_account(&registry) {
                println!("    {:<24} {}", account.as_str(), usage);
            }
            Ok(())
        }

        Commands::Verify { file } => {
            let (registry, path) = load(file, config, false)?;
            registry.check_invariants()?;
            println!("✅ {} - {} schemas valid", path.display(), registry.len());
            Ok(())
        }

        Commands::Render { id, file, pretty } => {
            let schema_id = SchemaId::parse(&id).ok_or_else(|| anyhow!("invalid schema id {:?}", id))?;
            let (registry, _) = load(file, config, pretty)?;
            let object = registry
                .get(schema_id)
                .ok_or_else(|| anyhow!("schema {} not found", schema_id))?;
            println!("{}", object.as_serialized_sync()?);
            Ok(())
        }

        Commands::Reconcile { file, write } => {
            let (mut registry, path) = load(file, config, false)?;
            let model = config.accounting.cost_model();
            let report = accounting::reconcile(&mut registry, &model)?;

            if report.is_noop() {
                println!("✅ Charged usage already up to date");
                return Ok(());
            }
            println!("🔧 {} entries updated", report.updated_entries);
            for (account, delta) in &report.deltas {
                println!("  {:<24} {:+}", account.as_str(), delta);
            }

            if write {
                snapshot::save_to_path(&registry, &path, config.snapshot.pretty)?;
                println!("💾 Wrote {}", path.display());
            }
            Ok(())
        }
    }
}
