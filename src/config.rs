//! Library configuration file

use crate::enrichment::refiner::{InferenceStep, LlmSettings};
use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Language-model and provider options shared by the binaries
#[derive(Args, Debug, Clone)]
pub struct EnrichmentArgs {
    /// Base URL of an OpenAI-compatible server
    #[arg(long, env = "LLM_BASE_URL", default_value = "")]
    pub llm_base_url: String,

    /// Model name sent with every completion request
    #[arg(long, env = "LLM_MODEL", default_value = "")]
    pub llm_model: String,

    /// LLM request timeout in seconds
    #[arg(long, env = "LLM_TIMEOUT", default_value = "5")]
    pub llm_timeout: u64,

    /// Google Books API key
    #[arg(long, env = "GOOGLE_BOOKS_API_KEY")]
    pub google_books_api_key: Option<String>,
}

fn default_db_name() -> String {
    "audiobooks.db".to_string()
}

fn default_tag_namespaces() -> Vec<String> {
    ["Genre", "Reader", "Romance", "Setting", "Commitment"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_range_namespaces() -> Vec<String> {
    vec!["Romance".to_string()]
}

fn default_inference_order() -> Vec<String> {
    vec!["description_clean".to_string(), "tag_inference".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// SQLite file, relative to the config file's directory unless absolute
    #[serde(default = "default_db_name")]
    pub db_name: String,
    #[serde(default)]
    pub library_roots: Vec<PathBuf>,
    /// Lower-case extensions with a leading dot; empty accepts every file
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    /// Paths containing any of these substrings are skipped
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default = "default_tag_namespaces")]
    pub tag_namespaces: Vec<String>,
    #[serde(default = "default_range_namespaces")]
    pub range_namespaces: Vec<String>,
    #[serde(default = "default_inference_order")]
    pub inference_order: Vec<String>,
    #[serde(default)]
    pub prompt_dir: Option<PathBuf>,

    #[serde(skip)]
    base_dir: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            db_name: default_db_name(),
            library_roots: Vec::new(),
            allowed_extensions: Vec::new(),
            ignore_patterns: Vec::new(),
            tag_namespaces: default_tag_namespaces(),
            range_namespaces: default_range_namespaces(),
            inference_order: default_inference_order(),
            prompt_dir: None,
            base_dir: PathBuf::from("."),
        }
    }
}

impl LibraryConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::from_json(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(content)?;
        config.allowed_extensions = config
            .allowed_extensions
            .iter()
            .map(|ext| ext.trim().to_lowercase())
            .filter(|ext| !ext.is_empty())
            .map(|ext| if ext.starts_with('.') { ext } else { format!(".{}", ext) })
            .collect();
        config.base_dir = PathBuf::from(".");
        Ok(config)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.resolve(Path::new(&self.db_name))
    }

    pub fn prompt_dir(&self) -> Option<PathBuf> {
        self.prompt_dir.as_deref().map(|dir| self.resolve(dir))
    }

    pub fn llm_settings(&self, args: &EnrichmentArgs) -> LlmSettings {
        let mut settings = LlmSettings::new(args.llm_base_url.as_str(), args.llm_model.as_str());
        settings.timeout = Duration::from_secs(args.llm_timeout.max(1));
        settings.prompt_dir = self.prompt_dir();
        settings.inference_order = self.inference_steps();
        settings.range_namespaces = self.range_namespaces.clone();
        settings
    }

    /// Configured inference steps; unknown names are logged and skipped
    pub fn inference_steps(&self) -> Vec<InferenceStep> {
        self.inference_order
            .iter()
            .filter_map(|name| {
                let step = InferenceStep::parse(name.trim(), &self.tag_namespaces);
                if step.is_none() {
                    tracing::warn!("Ignoring unknown inference step: {}", name);
                }
                step
            })
            .collect()
    }
}
