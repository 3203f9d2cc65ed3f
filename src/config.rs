// Copyright 2025 Tomoki Hayashi
// MIT License (https://opensource.org/licenses/MIT)

//! Configuration management.
//!
//! Config values are loaded with the following priority (highest to lowest):
//! 1. Environment variables (BATCHTAG_*)
//! 2. Config file (~/.config/batchtag/config.toml)
//! 3. Default values

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_PROMPT: &str = "Describe this image in detail for an AI image generator training dataset. Focus on the subject, clothes, pose, background, lighting, and artistic style. Provide the output as comma-separated keywords.";

pub const MAX_CONCURRENCY: usize = 10;

/// Captioning backend protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Google,
    OpenaiCompatible,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Grid,
    List,
}

impl ViewMode {
    /// Toggle between `Grid` and `List`.
    pub fn next(self) -> Self {
        match self {
            ViewMode::Grid => ViewMode::List,
            ViewMode::List => ViewMode::Grid,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub label: String,
    pub value: String,
}

impl PromptTemplate {
    fn new(id: &str, label: &str, value: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            value: value.to_string(),
        }
    }
}

pub fn default_templates() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate::new(
            "default-danbooru",
            "Danbooru Tags",
            "Analyze this image and provide a list of accurate, descriptive tags separated by commas. Include tags for character, clothing, setting, pose, and style. Do not use full sentences. Format: tag1, tag2, tag3",
        ),
        PromptTemplate::new(
            "default-caption",
            "Natural Language",
            "Write a detailed, descriptive caption for this image. Focus on the main subject, their actions, the environment, and the visual style. Use a neutral, objective tone.",
        ),
        PromptTemplate::new(
            "default-sd",
            "Stable Diffusion",
            "Describe this image as a Stable Diffusion prompt. Start with the subject, followed by details about appearance, clothing, background, lighting, and medium/style. Use high-quality descriptors.",
        ),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub protocol: Protocol,
    pub provider_name: String,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub active_prompt: String,
    pub concurrency: usize,
    pub blocked_words: Vec<String>,
    pub templates: Vec<PromptTemplate>,
    pub view_mode: ViewMode,
    pub grid_columns: usize,
    pub cell_aspect_ratio: f64,
    pub autosave_ms: u64,
    pub import_chunk_size: usize,
    pub workspace_dir: Option<PathBuf>,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: Protocol::Google,
            provider_name: "Official Gemini".to_string(),
            api_key: String::new(),
            base_url: "https://api.openai.com".to_string(),
            model: "gemini-2.5-flash".to_string(),
            active_prompt: DEFAULT_PROMPT.to_string(),
            concurrency: 3,
            blocked_words: ["username", "text logo", "watermark", "date", "signature"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            templates: default_templates(),
            view_mode: ViewMode::Grid,
            grid_columns: 0,
            cell_aspect_ratio: 2.0,
            autosave_ms: 1_000,
            import_chunk_size: 50,
            workspace_dir: None,
            debug: false,
        }
    }
}

/// Parse a protocol name. Returns `Google` as fallback for unknown values.
pub fn parse_protocol(s: &str) -> Protocol {
    let s = s.trim();
    if s.eq_ignore_ascii_case("openai")
        || s.eq_ignore_ascii_case("openai_compatible")
        || s.eq_ignore_ascii_case("openai-compatible")
    {
        Protocol::OpenaiCompatible
    } else {
        Protocol::Google
    }
}

impl Config {
    /// Load config with priority: env vars > config file > defaults
    pub fn load() -> Self {
        let mut config = Self::load_from_file().unwrap_or_default();
        config.apply_env_overrides();
        config.clamp_values();
        config
    }

    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("batchtag").join("config.toml"))
    }

    fn load_from_file() -> Option<Self> {
        let path = Self::config_path()?;
        let content = std::fs::read_to_string(path).ok()?;
        toml::from_str(&content).ok()
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BATCHTAG_PROTOCOL") {
            self.protocol = parse_protocol(&v);
        }
        if let Ok(v) = std::env::var("BATCHTAG_API_KEY") {
            self.api_key = v;
        }
        if let Ok(v) = std::env::var("BATCHTAG_BASE_URL") {
            self.base_url = v;
        }
        if let Ok(v) = std::env::var("BATCHTAG_MODEL") {
            self.model = v;
        }
        if let Ok(v) = std::env::var("BATCHTAG_PROMPT") {
            self.active_prompt = v;
        }
        if let Some(v) = Self::parse_env::<usize>("BATCHTAG_CONCURRENCY") {
            self.concurrency = v;
        }
        if let Ok(v) = std::env::var("BATCHTAG_BLOCKED_WORDS") {
            self.blocked_words = v
                .split(',')
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty())
                .collect();
        }
        if let Some(v) = Self::parse_env::<usize>("BATCHTAG_GRID_COLUMNS") {
            self.grid_columns = v;
        }
        if let Some(v) = Self::parse_env::<f64>("BATCHTAG_CELL_ASPECT_RATIO") {
            self.cell_aspect_ratio = v;
        }
        if let Some(v) = Self::parse_env::<u64>("BATCHTAG_AUTOSAVE_MS") {
            self.autosave_ms = v;
        }
        if let Some(v) = Self::parse_env::<usize>("BATCHTAG_IMPORT_CHUNK_SIZE") {
            self.import_chunk_size = v;
        }
        if let Some(v) = std::env::var_os("BATCHTAG_WORKSPACE") {
            self.workspace_dir = Some(PathBuf::from(v));
        }
        if std::env::var_os("BATCHTAG_DEBUG").is_some() {
            self.debug = true;
        }
    }

    pub fn clamp_values(&mut self) {
        const MAX_GRID_COLUMNS: usize = 12;
        const MAX_AUTOSAVE_MS: u64 = 60_000;
        const MAX_IMPORT_CHUNK: usize = 1_000;

        self.concurrency = self.concurrency.clamp(1, MAX_CONCURRENCY);
        self.grid_columns = self.grid_columns.min(MAX_GRID_COLUMNS);
        self.cell_aspect_ratio = self.cell_aspect_ratio.clamp(1.0, 4.0);
        self.autosave_ms = self.autosave_ms.min(MAX_AUTOSAVE_MS);
        self.import_chunk_size = self.import_chunk_size.clamp(1, MAX_IMPORT_CHUNK);
    }

    fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
        std::env::var(key).ok()?.parse().ok()
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Worker pool size for a batch run.
    pub fn worker_count(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }

    pub fn effective_model(&self) -> &str {
        let model = self.model.trim();
        if !model.is_empty() {
            return model;
        }
        match self.protocol {
            Protocol::Google => "gemini-2.5-flash",
            Protocol::OpenaiCompatible => "gpt-4o",
        }
    }

    /// Make the template with `id` the active prompt.
    pub fn apply_template(&mut self, id: &str) -> bool {
        match self.templates.iter().find(|t| t.id == id) {
            Some(t) => {
                self.active_prompt = t.value.clone();
                true
            }
            None => false,
        }
    }

    /// Index of the template matching the active prompt, if any.
    pub fn active_template(&self) -> Option<usize> {
        self.templates
            .iter()
            .position(|t| t.value == self.active_prompt)
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("batchtag")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.protocol, Protocol::Google);
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.autosave_ms, 1_000);
        assert_eq!(config.import_chunk_size, 50);
        assert_eq!(config.templates.len(), 3);
        assert!(config.blocked_words.contains(&"watermark".to_string()));
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_clamp_values() {
        let mut config = Config {
            concurrency: 50,
            grid_columns: 40,
            cell_aspect_ratio: 9.0,
            autosave_ms: 1_000_000,
            import_chunk_size: 0,
            ..Default::default()
        };
        config.clamp_values();
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.grid_columns, 12);
        assert_eq!(config.cell_aspect_ratio, 4.0);
        assert_eq!(config.autosave_ms, 60_000);
        assert_eq!(config.import_chunk_size, 1);

        let mut config = Config {
            concurrency: 0,
            ..Default::default()
        };
        config.clamp_values();
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn test_parse_protocol() {
        assert_eq!(parse_protocol("openai"), Protocol::OpenaiCompatible);
        assert_eq!(parse_protocol(" OpenAI_Compatible "), Protocol::OpenaiCompatible);
        assert_eq!(parse_protocol("google"), Protocol::Google);
        assert_eq!(parse_protocol("bogus"), Protocol::Google);
    }

    #[test]
    fn test_effective_model_defaults_per_protocol() {
        let mut config = Config {
            model: "  ".to_string(),
            ..Default::default()
        };
        assert_eq!(config.effective_model(), "gemini-2.5-flash");
        config.protocol = Protocol::OpenaiCompatible;
        assert_eq!(config.effective_model(), "gpt-4o");
        config.model = "llava".to_string();
        assert_eq!(config.effective_model(), "llava");
    }

    #[test]
    fn test_apply_template() {
        let mut config = Config::default();
        assert!(config.apply_template("default-sd"));
        assert_eq!(config.active_template(), Some(2));
        assert!(!config.apply_template("missing"));
        assert_eq!(config.active_template(), Some(2));
    }

    #[test]
    fn test_parse_toml_partial() {
        let config: Config = toml::from_str(
            r#"
            protocol = "openai_compatible"
            api_key = "k"
            concurrency = 5
            view_mode = "list"
            "#,
        )
        .unwrap();
        assert_eq!(config.protocol, Protocol::OpenaiCompatible);
        assert!(config.has_credentials());
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.view_mode, ViewMode::List);
        assert_eq!(config.import_chunk_size, 50);
    }
}
