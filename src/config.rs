//! Configuration provider and the YAML-backed application config.
//!
//! Components never read ambient global state. They receive a
//! [`ConfigProvider`] at construction and look credentials up through it.

use crate::error::{IngestError, Result};
use crate::models::FetchRequest;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, instrument};

pub const NEWS_API_KEY: &str = "news_api_key";
pub const PUBMED_API_KEY: &str = "pubmed_api_key";
pub const SCHOLAR_API_KEY: &str = "scholar_api_key";
pub const AI_BASE_URL: &str = "ai_base_url";
pub const AI_API_KEY: &str = "ai_api_key";
pub const AI_MODEL: &str = "ai_model";
pub const AI_MAX_TOKENS: &str = "ai_max_tokens";
pub const AI_TEMPERATURE: &str = "ai_temperature";
pub const AI_PROMPT: &str = "ai_prompt";
pub const DEBUG: &str = "debug";

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "NEWS_INGEST_";

/// Read access to credentials and settings.
pub trait ConfigProvider: Send + Sync {
    /// Look up a setting. Blank values count as missing.
    fn get_config(&self, key: &str) -> Option<String>;

    /// Look up a setting that must be present.
    fn require(&self, key: &str) -> Result<String> {
        self.get_config(key)
            .ok_or_else(|| IngestError::Configuration(format!("{key} is not configured")))
    }

    /// Whether failure reports should carry the full error chain.
    fn debug_mode(&self) -> bool {
        self.get_config(DEBUG)
            .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
    }
}

impl ConfigProvider for HashMap<String, String> {
    fn get_config(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.trim().is_empty()).cloned()
    }
}

/// Contents of the YAML config file.
///
/// ```yaml
/// settings:
///   news_api_key: "..."
///   ai_base_url: "https://api.deepseek.com"
/// sources:
///   - id: tech
///     category_id: 3
///     source:
///       kind: rss
///       feed_urls: ["https://example.com/feed.xml"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default)]
    pub sources: Vec<FetchRequest>,
}

impl AppConfig {
    /// Load the config file. Environment overrides are applied at lookup time.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            IngestError::Configuration(format!(
                "cannot read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        let config = Self::from_yaml(&raw)?;
        info!(
            sources = config.sources.len(),
            settings = config.settings.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(raw)?;
        if let Some(dup) = config
            .sources
            .iter()
            .enumerate()
            .find(|(i, s)| config.sources[..*i].iter().any(|o| o.id == s.id))
            .map(|(_, s)| s.id.clone())
        {
            return Err(IngestError::Configuration(format!(
                "duplicate source id {dup}"
            )));
        }
        Ok(config)
    }

    /// Find a source definition by id.
    pub fn source(&self, id: &str) -> Result<&FetchRequest> {
        self.sources
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| IngestError::Configuration(format!("unknown source id {id}")))
    }
}

impl ConfigProvider for AppConfig {
    fn get_config(&self, key: &str) -> Option<String> {
        let env_key = format!("{ENV_PREFIX}{}", key.to_ascii_uppercase());
        if let Ok(value) = std::env::var(&env_key) {
            if !value.trim().is_empty() {
                debug!(key, "Setting taken from environment");
                return Some(value);
            }
        }
        self.settings
            .get(key)
            .filter(|v| !v.trim().is_empty())
            .cloned()
    }
}
