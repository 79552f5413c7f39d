//! Error taxonomy for the detection and anonymization pipeline

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PiiError>;

#[derive(Debug, Error)]
pub enum PiiError {
    #[error("failed to load model '{model}': {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("inference failed: {reason}")]
    Inference { reason: String },

    #[error("invalid anonymization operator: '{0}'")]
    InvalidOperator(String),

    #[error("unsupported export format: '{0}'")]
    UnsupportedExportFormat(String),

    #[error("unsupported input format: '{0}'")]
    UnsupportedInputFormat(String),

    #[error("language '{language}' is not supported (supported: {})", supported.join(", "))]
    UnsupportedLanguage {
        language: String,
        supported: Vec<String>,
    },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV serialization failed: {0}")]
    Csv(#[from] csv::Error),
}

impl PiiError {
    pub(crate) fn model_load(model: &str, reason: impl std::fmt::Display) -> Self {
        Self::ModelLoad {
            model: model.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn inference(reason: impl std::fmt::Display) -> Self {
        Self::Inference {
            reason: reason.to_string(),
        }
    }
}
