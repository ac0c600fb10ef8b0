//! CLI entry point for objmigrate-records: inspect the record ledger.

use clap::{Parser, Subcommand};
use objmigrate::record::sqlite::SqliteLedger;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "objmigrate-records", about = "objmigrate record ledger tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export completed records as JSON
    Export {
        #[arg(long, default_value = "objmigrate.yaml")]
        config: PathBuf,
        #[arg(long)]
        db: Option<String>,
        #[arg(long, default_value = "-")]
        output: String,
    },
    /// Print the number of completed records
    Count {
        #[arg(long, default_value = "objmigrate.yaml")]
        config: PathBuf,
        #[arg(long)]
        db: Option<String>,
    },
}

/// Ledger path from `record.path` in the config, or the default.
fn resolve_db_path(config_path: &Path) -> anyhow::Result<String> {
    let content = std::fs::read_to_string(config_path)?;
    let raw: serde_yaml::Value = serde_yaml::from_str(&content)?;
    let path = raw
        .get("record")
        .and_then(|r| r.get("path"))
        .and_then(|p| p.as_str())
        .unwrap_or("./data/records.db");
    Ok(path.to_string())
}

fn open_ledger(config: &Path, db: Option<String>) -> anyhow::Result<SqliteLedger> {
    let db_path = match db {
        Some(p) => p,
        None => resolve_db_path(config)?,
    };
    if !Path::new(&db_path).exists() {
        anyhow::bail!("record ledger not found: {}", db_path);
    }
    SqliteLedger::new(&db_path)
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Export { config, db, output } => run_export(&config, db, &output),
        Commands::Count { config, db } => run_count(&config, db),
    };
    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_export(config: &Path, db: Option<String>, output: &str) -> anyhow::Result<()> {
    let ledger = open_ledger(config, db)?;
    let records = ledger.list()?;
    let body = serde_json::to_string_pretty(&records)?;
    if output == "-" {
        println!("{}", body);
    } else {
        std::fs::write(output, format!("{}\n", body))?;
        eprintln!("Exported {} records to {}", records.len(), output);
    }
    Ok(())
}

fn run_count(config: &Path, db: Option<String>) -> anyhow::Result<()> {
    let ledger = open_ledger(config, db)?;
    println!("{}", ledger.count()?);
    Ok(())
}
