use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{fs, path::PathBuf};

use deposit_annex::{document::sample, Schema};

#[derive(Parser)]
#[command(name = "xtask", about = "deposit-annex workspace tasks")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Patch a saved deposit schema, compile it as draft-04 and validate the built-in sample
    CheckSchema {
        file: PathBuf,
        /// Write the patched schema here
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::CheckSchema { file, out } => check_schema(&file, out.as_ref()),
    }
}

fn check_schema(path: &PathBuf, out: Option<&PathBuf>) -> Result<()> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let raw: serde_json::Value = serde_json::from_str(&text).with_context(|| "parse json")?;
    let schema = Schema::compile(&raw)?;
    let errors = schema.validate(&sample());
    if !errors.is_empty() {
        eprintln!("Sample record does not validate against {}", path.display());
        for e in errors {
            eprintln!("- {}", e);
        }
        std::process::exit(1);
    }
    if let Some(out) = out {
        fs::write(out, serde_json::to_string_pretty(schema.value())?)?;
        println!("patched schema written to {}", out.display());
    }
    println!("OK: {}", path.display());
    Ok(())
}
