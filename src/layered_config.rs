use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}, sync::Arc};

pub const DEFAULT_BASE_URL: &str = "https://sandbox.zenodo.org";
pub const DEFAULT_DOI_PREFIX: &str = "10.13039/501100000780";
pub const DEFAULT_SCHEMA_URL: &str = "https://sandbox.zenodo.org/api/schemas/deposits/records/legacyrecord.json";

/// One configuration layer as written on disk. Every field is optional so that
/// layers only override what they mention: system -> user -> workspace -> runtime.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteLayer,
    pub editor: EditorLayer,
    pub logging: LoggingLayer,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct RemoteLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct EditorLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersede_stale: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unreachable: Option<UnreachablePolicy>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct LoggingLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// What `on_change` and `commit` do with an edited record.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Edits are validated but the held record never changes.
    #[default]
    Discard,
    /// Edits replace the held record and become the next diff baseline.
    Persist,
}

/// How a lookup that never reached the registry affects a pass.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnreachablePolicy {
    /// Logged and dropped; the field is neither valid nor invalid.
    #[default]
    Inconclusive,
    /// The whole pass fails with the first transport error.
    Abort,
}

/// Fully resolved settings, defaults filled in.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub remote: RemoteConfig,
    pub editor: EditorConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RemoteConfig {
    pub base_url: String,
    pub doi_prefix: String,
    pub schema_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EditorConfig {
    pub commit: CommitPolicy,
    pub supersede_stale: bool,
    pub unreachable: UnreachablePolicy,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for Settings {
    fn default() -> Self { Config::default().resolve() }
}

impl Config {
    pub fn resolve(&self) -> Settings {
        let r = &self.remote;
        let e = &self.editor;
        Settings {
            remote: RemoteConfig {
                base_url: r.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.into()),
                doi_prefix: r.doi_prefix.clone().unwrap_or_else(|| DEFAULT_DOI_PREFIX.into()),
                schema_url: r.schema_url.clone().unwrap_or_else(|| DEFAULT_SCHEMA_URL.into()),
                timeout_secs: r.timeout_secs.unwrap_or(10),
            },
            editor: EditorConfig {
                commit: e.commit.unwrap_or_default(),
                supersede_stale: e.supersede_stale.unwrap_or(true),
                unreachable: e.unreachable.unwrap_or_default(),
            },
            logging: LoggingConfig {
                filter: self.logging.filter.clone().unwrap_or_else(|| "info".into()),
            },
        }
    }

    /// Set one dotted key from its textual value, e.g. `editor.commit persist`.
    pub fn set_key(&mut self, key: &str, value: &str) -> Result<()> {
        let enum_value = |v: &str| serde_json::Value::String(v.to_string());
        match key {
            "remote.base_url" => self.remote.base_url = Some(value.into()),
            "remote.doi_prefix" => self.remote.doi_prefix = Some(value.into()),
            "remote.schema_url" => self.remote.schema_url = Some(value.into()),
            "remote.timeout_secs" => self.remote.timeout_secs = Some(value.parse().context("timeout_secs")?),
            "editor.commit" => {
                self.editor.commit = Some(serde_json::from_value(enum_value(value))
                    .with_context(|| format!("editor.commit must be discard|persist, got {value}"))?)
            }
            "editor.supersede_stale" => self.editor.supersede_stale = Some(value.parse().context("supersede_stale")?),
            "editor.unreachable" => {
                self.editor.unreachable = Some(serde_json::from_value(enum_value(value))
                    .with_context(|| format!("editor.unreachable must be inconclusive|abort, got {value}"))?)
            }
            "logging.filter" => self.logging.filter = Some(value.into()),
            _ => return Err(anyhow!("unsupported key: {key}")),
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope { System, User, Workspace, Runtime }

fn merge(a: &mut Config, b: &Config) {
    macro_rules! ov { ($dst:expr, $src:expr) => { if $src.is_some() { $dst = $src.clone(); } } }

    ov!(a.remote.base_url, b.remote.base_url);
    ov!(a.remote.doi_prefix, b.remote.doi_prefix);
    ov!(a.remote.schema_url, b.remote.schema_url);
    ov!(a.remote.timeout_secs, b.remote.timeout_secs);

    ov!(a.editor.commit, b.editor.commit);
    ov!(a.editor.supersede_stale, b.editor.supersede_stale);
    ov!(a.editor.unreachable, b.editor.unreachable);

    ov!(a.logging.filter, b.logging.filter);
}

fn config_paths(workspace_root: &Path) -> Result<(PathBuf, PathBuf, PathBuf)> {
    let proj = ProjectDirs::from("org", "zenodo", "deposit-annex").context("ProjectDirs not available")?;
    let user = proj.config_dir().join("config.toml");
    let system = if cfg!(target_os = "windows") {
        PathBuf::from(r"C:\ProgramData\DepositAnnex\config.toml")
    } else {
        PathBuf::from("/etc/deposit-annex/config.toml")
    };
    let workspace = workspace_root.join(".deposit-annex").join("config.toml");
    Ok((system, user, workspace))
}

#[derive(Clone)]
pub struct ConfigManager {
    inner: Arc<RwLock<Config>>,
    runtime_overlay: Arc<RwLock<Config>>,
    system_path: PathBuf,
    user_path: PathBuf,
    workspace_path: PathBuf,
}

impl ConfigManager {
    pub fn load(workspace_root: impl AsRef<Path>) -> Result<Self> {
        let (system, user, workspace) = config_paths(workspace_root.as_ref())?;
        Self::with_paths(system, user, workspace)
    }

    pub fn with_paths(system_path: PathBuf, user_path: PathBuf, workspace_path: PathBuf) -> Result<Self> {
        let me = Self {
            inner: Arc::new(RwLock::new(Config::default())),
            runtime_overlay: Arc::new(RwLock::new(Config::default())),
            system_path, user_path, workspace_path,
        };
        me.reload_all()?;
        Ok(me)
    }

    /// A missing file is an empty layer; a file that exists but does not parse is an error.
    fn read_file(path: &Path) -> Result<Option<Config>> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        let cfg = toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
        Ok(Some(cfg))
    }

    pub fn reload_all(&self) -> Result<()> {
        let mut merged = Config::default();
        for p in [&self.system_path, &self.user_path, &self.workspace_path] {
            if let Some(layer) = Self::read_file(p)? { merge(&mut merged, &layer); }
        }
        let rt = self.runtime_overlay.read().clone();
        merge(&mut merged, &rt);
        *self.inner.write() = merged;
        Ok(())
    }

    pub fn get(&self) -> Config { self.inner.read().clone() }
    pub fn settings(&self) -> Settings { self.get().resolve() }

    pub fn path(&self, scope: Scope) -> Option<&Path> {
        match scope {
            Scope::System => Some(&self.system_path),
            Scope::User => Some(&self.user_path),
            Scope::Workspace => Some(&self.workspace_path),
            Scope::Runtime => None,
        }
    }

    /// In-memory overlay (not persisted).
    pub fn apply_runtime_overlay(&self, patch: Config) -> Result<()> {
        {
            let mut rt = self.runtime_overlay.write();
            merge(&mut rt, &patch);
        }
        self.reload_all()
    }

    pub fn write_patch(&self, scope: Scope, patch: &Config) -> Result<PathBuf> {
        use std::io::Write;
        let path = self.path(scope).ok_or_else(|| anyhow!("runtime scope is ephemeral; cannot persist"))?;
        if let Some(dir) = path.parent() { fs::create_dir_all(dir)?; }
        let mut merged = Self::read_file(path)?.unwrap_or_default();
        merge(&mut merged, patch);
        let text = toml::to_string_pretty(&merged).context("serialize toml")?;
        let mut f = fs::File::create(path)?;
        f.write_all(text.as_bytes())?;
        self.reload_all()?;
        Ok(path.to_path_buf())
    }
}
