//! Configuration management for czech-pii-anonymizer

use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::anonymizer::OperatorKind;

pub const DEFAULT_MODEL: &str = "iiiorg/piiranha-v1-detect-personal-information";
pub const DEFAULT_LANGUAGE: &str = "cs";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub detection: DetectionConfig,
    pub anonymization: AnonymizationConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub model: String,
    pub language: String,
    pub confidence_threshold: f64,
    /// Entity types to report. Empty means every type the model supports.
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default = "default_true")]
    pub predefined_recognizers: bool,
    /// Extra rule-based recognizers: entity type -> regex.
    #[serde(default)]
    pub patterns: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymizationConfig {
    pub operator: String,
    pub mask_char: char,
    pub chars_to_mask: usize,
    #[serde(default)]
    pub from_end: bool,
    #[serde(default = "default_true")]
    pub aggregate_redaction: bool,
    #[serde(default)]
    pub entity_operators: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub cache_dir: Option<PathBuf>,
    pub max_length: usize,
    pub intra_threads: usize,
    pub token_env: String,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detection: DetectionConfig {
                model: DEFAULT_MODEL.to_string(),
                language: DEFAULT_LANGUAGE.to_string(),
                confidence_threshold: 0.5,
                entities: Vec::new(),
                predefined_recognizers: true,
                patterns: HashMap::new(),
            },
            anonymization: AnonymizationConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for AnonymizationConfig {
    fn default() -> Self {
        Self {
            operator: "replace".to_string(),
            mask_char: '*',
            chars_to_mask: 4,
            from_end: false,
            aggregate_redaction: true,
            entity_operators: HashMap::new(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            max_length: 512,
            intra_threads: 4,
            token_env: "HUGGINGFACE_TOKEN".to_string(),
        }
    }
}

impl ModelConfig {
    /// Reads the Hugging Face token from the configured environment variable.
    /// A missing token only limits access to gated models.
    pub fn resolve_token(&self) -> Option<String> {
        match std::env::var(&self.token_env) {
            Ok(token) if !token.trim().is_empty() => {
                debug!("Using Hugging Face token from ${}", self.token_env);
                Some(token)
            }
            _ => {
                warn!("{} not found in environment variables", self.token_env);
                None
            }
        }
    }
}

impl Config {
    pub fn get_app_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("cz", "czech-pii-anonymizer", "czech-pii-anonymizer")
            .ok_or_else(|| anyhow::anyhow!("Failed to determine application directories"))
    }

    pub fn resolve_paths(&mut self) -> Result<()> {
        if let Some(cache_dir) = self.model.cache_dir.as_ref().filter(|p| p.is_relative()) {
            let project_dirs = Self::get_app_dirs()?;
            let data_dir = project_dirs.data_dir();
            std::fs::create_dir_all(data_dir)?;
            self.model.cache_dir = Some(data_dir.join(cache_dir));
        }

        Ok(())
    }

    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&contents)?;
        config.resolve_paths()?;
        Ok(config)
    }

    pub fn get_default_config_path() -> Result<PathBuf> {
        let project_dirs = Self::get_app_dirs()?;
        let config_dir = project_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;
        Ok(config_dir.join("czech-pii-anonymizer.toml"))
    }

    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.detection.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Model identifier must not be empty"));
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(anyhow::anyhow!("Confidence threshold must be between 0.0 and 1.0"));
        }

        for (name, pattern) in &self.detection.patterns {
            regex::Regex::new(pattern)
                .map_err(|e| anyhow::anyhow!("Invalid regex pattern for '{}': {}", name, e))?;
        }

        self.anonymization
            .operator
            .parse::<OperatorKind>()
            .map_err(|e| anyhow::anyhow!("Invalid default operator: {}", e))?;

        for (entity, operator) in &self.anonymization.entity_operators {
            operator
                .parse::<OperatorKind>()
                .map_err(|e| anyhow::anyhow!("Invalid operator for entity '{}': {}", entity, e))?;
        }

        if self.model.max_length == 0 {
            return Err(anyhow::anyhow!("Model max_length must be greater than zero"));
        }

        Ok(())
    }
}

/// A detected entity, in character offsets of the analyzed text.
/// `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
    pub score: f64,
}

impl EntitySpan {
    pub fn new(entity_type: impl Into<String>, start: usize, end: usize, score: f64) -> Self {
        Self {
            entity_type: entity_type.into(),
            start,
            end,
            score,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// True when `0 <= start < end <= text_len`.
    pub fn is_within(&self, text_len: usize) -> bool {
        self.start < self.end && self.end <= text_len
    }
}
