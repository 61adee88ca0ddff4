// deposit-annex/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::{path::{Path, PathBuf}, process::ExitCode, sync::Arc};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use deposit_annex::{
    watch, ChangeValidator, Config, ConfigManager, Document, EditEvent, EditorSession, FileEdits,
    HttpRegistry, LookupKind, PassOutcome, Registry, SchemaLoader, Scope, Settings,
};

#[derive(Parser)]
#[command(name = "deposit-annex", version, about = "Edit deposit metadata against the deposit schema and registry")]
struct Args {
    /// Registry base URL
    #[arg(long, global = true, env = "DEPOSIT_ANNEX_BASE_URL")]
    base_url: Option<String>,
    /// Funder DOI prefix used for numeric grant ids
    #[arg(long, global = true, env = "DEPOSIT_ANNEX_DOI_PREFIX")]
    doi_prefix: Option<String>,
    /// Schema URL or local path
    #[arg(long, global = true, env = "DEPOSIT_ANNEX_SCHEMA_URL")]
    schema_url: Option<String>,
    /// Workspace root holding `.deposit-annex/config.toml`
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Load, patch and print the deposit schema
    Schema,
    /// Ask the registry whether one identifier exists
    Check { kind: Kind, id: String },
    /// Validate a record once, diffing against `--prev` (default: the built-in sample)
    Validate {
        next: PathBuf,
        #[arg(long)]
        prev: Option<PathBuf>,
    },
    /// Watch a record file and validate every save
    Edit { file: PathBuf },
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Set {
        key: String,
        value: String,
        #[arg(long, value_enum, default_value_t = WriteScope::Workspace)]
        scope: WriteScope,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Kind { License, Grant, Community }

impl From<Kind> for LookupKind {
    fn from(k: Kind) -> Self {
        match k {
            Kind::License => LookupKind::License,
            Kind::Grant => LookupKind::Grant,
            Kind::Community => LookupKind::Community,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum WriteScope { User, Workspace }

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let cfg = ConfigManager::load(&args.workspace)?;
    cfg.apply_runtime_overlay(flag_overlay(&args))?;
    let settings = cfg.settings();

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| settings.logging.filter.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match args.cmd {
        Cmd::Schema => {
            let schema = loader(&settings)?.load(&settings.remote.schema_url).await?;
            println!("{}", serde_json::to_string_pretty(schema.value())?);
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Check { kind, id } => {
            let registry = HttpRegistry::new(&settings.remote)?;
            let found = registry.exists(kind.into(), &id).await?;
            println!("{}", if found { "exists" } else { "missing" });
            Ok(if found { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Cmd::Validate { next, prev } => validate_once(&settings, &next, prev.as_deref()).await,
        Cmd::Edit { file } => edit(&settings, &file).await,
        Cmd::Config { action: ConfigAction::Show } => {
            println!("{}", toml::to_string_pretty(&cfg.get())?);
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Config { action: ConfigAction::Set { key, value, scope } } => {
            let mut patch = Config::default();
            patch.set_key(&key, &value)?;
            let scope = match scope { WriteScope::User => Scope::User, WriteScope::Workspace => Scope::Workspace };
            let path = cfg.write_patch(scope, &patch)?;
            println!("{key} = {value} ({})", path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn flag_overlay(args: &Args) -> Config {
    let mut c = Config::default();
    c.remote.base_url = args.base_url.clone();
    c.remote.doi_prefix = args.doi_prefix.clone();
    c.remote.schema_url = args.schema_url.clone();
    c
}

fn loader(settings: &Settings) -> Result<SchemaLoader> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(settings.remote.timeout_secs))
        .build()?;
    Ok(SchemaLoader::new(client))
}

/// Schema, registry and session are built once here and handed down.
async fn ready_session(settings: &Settings, metadata: Document) -> Result<Arc<EditorSession>> {
    let registry: Arc<dyn Registry> = Arc::new(HttpRegistry::new(&settings.remote)?);
    let validator = ChangeValidator::new(registry, settings.editor.unreachable);
    let session = Arc::new(EditorSession::with_metadata(validator, settings.editor, metadata));
    session.load_schema(&loader(settings)?, &settings.remote.schema_url).await?;
    Ok(session)
}

fn read_record(path: &Path) -> Result<Document> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(Document::from_text(text))
}

async fn validate_once(settings: &Settings, next: &Path, prev: Option<&Path>) -> Result<ExitCode> {
    let baseline = match prev {
        Some(p) => read_record(p)?,
        None => Document::Json(deposit_annex::document::sample()),
    };
    let session = ready_session(settings, baseline).await?;
    match session.validate(&read_record(next)?).await? {
        PassOutcome::Report(r) => {
            println!("{}", serde_json::to_string_pretty(&r.errors)?);
            Ok(if r.is_clean() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        PassOutcome::Superseded { .. } => bail!("single validation pass was superseded"),
    }
}

async fn edit(settings: &Settings, file: &Path) -> Result<ExitCode> {
    let initial = std::fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let baseline = match Document::from_text(initial.clone()) {
        doc if doc.is_object() => doc,
        _ => Document::Json(deposit_annex::document::sample()),
    };
    let session = ready_session(settings, baseline).await?;
    let mut edits = FileEdits::watch(file)?;
    edits.prime(&initial);
    info!(path = %file.display(), "watching record; save to validate, Ctrl-C to stop");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let driver = tokio::spawn(watch::run(session, edits, tx));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            ev = rx.recv() => match ev {
                Some(EditEvent::Pass(PassOutcome::Report(r))) if r.is_clean() => println!("#{} ok", r.seq),
                Some(EditEvent::Pass(PassOutcome::Report(r))) => {
                    println!("#{} {} error(s)", r.seq, r.errors.len());
                    for e in &r.errors { println!("  {e}"); }
                }
                Some(EditEvent::Pass(PassOutcome::Superseded { .. })) => {}
                Some(EditEvent::Failed(e)) => println!("validation failed: {e}"),
                None => break,
            },
        }
    }
    driver.abort();
    Ok(ExitCode::SUCCESS)
}
