// deposit-annex/src/registry.rs

use async_trait::async_trait;
use regex::Regex;
use std::{sync::LazyLock, time::Duration};
use tracing::debug;

use crate::{error::LookupError, layered_config::RemoteConfig};

static NUMERIC_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("static regex"));

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LookupKind { License, Grant, Community }

impl LookupKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::License => "license",
            Self::Grant => "grant",
            Self::Community => "community",
        }
    }

    fn collection(&self) -> &'static str {
        match self {
            Self::License => "licenses",
            Self::Grant => "grants",
            Self::Community => "communities",
        }
    }
}

/// Existence checks against the deposit service.
/// `Ok(false)` means the registry answered and does not know the id;
/// `Err` means it could not be asked.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn exists(&self, kind: LookupKind, id: &str) -> Result<bool, LookupError>;
}

/// Rewrites purely numeric grant ids into the funder-prefixed compound form.
pub fn grant_identifier(doi_prefix: &str, id: &str) -> String {
    if NUMERIC_ID.is_match(id) {
        format!("{doi_prefix}::{id}")
    } else {
        id.to_string()
    }
}

#[derive(Clone)]
pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
    doi_prefix: String,
}

impl HttpRegistry {
    pub fn new(cfg: &RemoteConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self::with_client(client, &cfg.base_url, &cfg.doi_prefix))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, doi_prefix: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            doi_prefix: doi_prefix.to_string(),
        }
    }

    /// Ids go into the path as-is; grant ids legitimately contain `/`.
    pub fn url_for(&self, kind: LookupKind, id: &str) -> String {
        let id = match kind {
            LookupKind::Grant => grant_identifier(&self.doi_prefix, id),
            _ => id.to_string(),
        };
        format!("{}/api/{}/{}", self.base_url, kind.collection(), id)
    }

    pub async fn check_license_exists(&self, id: &str) -> Result<bool, LookupError> {
        self.exists(LookupKind::License, id).await
    }

    pub async fn check_grant_exists(&self, id: &str) -> Result<bool, LookupError> {
        self.exists(LookupKind::Grant, id).await
    }

    pub async fn check_community_exists(&self, id: &str) -> Result<bool, LookupError> {
        self.exists(LookupKind::Community, id).await
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn exists(&self, kind: LookupKind, id: &str) -> Result<bool, LookupError> {
        let url = self.url_for(kind, id);
        let res = self.client.get(&url).send().await.map_err(|source| LookupError::Transport {
            kind: kind.label(),
            id: id.to_string(),
            source,
        })?;
        let status = res.status();
        debug!(kind = kind.label(), %url, status = status.as_u16(), "registry lookup");
        Ok(status.is_success())
    }
}
