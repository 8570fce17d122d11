use std::path::PathBuf;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::store::write_json_atomic;

pub const DEFAULT_PROMPT: &str = "You are a helpful assistant that creates concise, accurate \
summaries of text content. Maintain the key information and main ideas while reducing the \
length according to the specified ratio. Keep the summary coherent and well-structured.";

/// Summarizer settings: defaults, overlaid by the config file, overlaid by
/// environment variables. Serde `default` gives the file the field-level
/// spread semantics (a partial file only overrides what it names).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SummarizerConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub prompt: String,
    pub default_ratio: f64,
    pub max_retries: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_owned(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_owned(),
            prompt: DEFAULT_PROMPT.to_owned(),
            default_ratio: 0.3,
            max_retries: 3,
        }
    }
}

/// Partial update applied to the file copy of the config. Env overrides are
/// never written back.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub default_ratio: Option<f64>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join("config.json"),
        }
    }

    /// Effective config: file merged over defaults, env overrides on top.
    pub async fn load(&self) -> anyhow::Result<SummarizerConfig> {
        let mut config = self.load_file().await?;
        apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    pub async fn update(&self, updates: ConfigUpdate) -> anyhow::Result<SummarizerConfig> {
        let mut file_config = self.load_file().await?;
        apply_update(&mut file_config, updates);
        write_json_atomic(&self.path, &file_config)
            .await
            .context("save config")?;
        self.load().await
    }

    async fn load_file(&self) -> anyhow::Result<SummarizerConfig> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parse config: {}", self.path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let config = SummarizerConfig::default();
                write_json_atomic(&self.path, &config)
                    .await
                    .context("write initial config")?;
                Ok(config)
            }
            Err(err) => {
                Err(err).with_context(|| format!("read config: {}", self.path.display()))
            }
        }
    }
}

fn apply_update(config: &mut SummarizerConfig, updates: ConfigUpdate) {
    if let Some(base_url) = updates.base_url {
        config.base_url = base_url;
    }
    if let Some(api_key) = updates.api_key {
        config.api_key = api_key;
    }
    if let Some(model) = updates.model {
        config.model = model;
    }
    if let Some(prompt) = updates.prompt {
        config.prompt = prompt;
    }
    if let Some(ratio) = updates.default_ratio
        && ratio > 0.0
        && ratio <= 1.0
    {
        config.default_ratio = ratio;
    }
    if let Some(retries) = updates.max_retries {
        config.max_retries = retries;
    }
}

/// Env vars have the highest priority. Malformed numeric values are ignored
/// rather than failing the load.
pub fn apply_env_overrides(
    config: &mut SummarizerConfig,
    get: impl Fn(&str) -> Option<String>,
) {
    if let Some(base_url) = get("READSPAN_OPENAI_BASE_URL") {
        config.base_url = base_url;
    }
    if let Some(api_key) = get("OPENAI_API_KEY") {
        config.api_key = api_key;
    }
    if let Some(model) = get("READSPAN_OPENAI_MODEL") {
        config.model = model;
    }
    if let Some(prompt) = get("READSPAN_PROMPT") {
        config.prompt = prompt;
    }
    if let Some(raw) = get("READSPAN_DEFAULT_RATIO")
        && let Ok(ratio) = raw.trim().parse::<f64>()
        && ratio > 0.0
        && ratio <= 1.0
    {
        config.default_ratio = ratio;
    }
    if let Some(raw) = get("READSPAN_MAX_RETRIES")
        && let Ok(retries) = raw.trim().parse::<u32>()
    {
        config.max_retries = retries;
    }
}
