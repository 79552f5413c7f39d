//! ONNX Runtime token-classification backend
//!
//! Loads `model.onnx`, `tokenizer.json` and `config.json` either from a local
//! directory or from the Hugging Face Hub, and implements [`TokenClassifier`]
//! on top of them.

use hf_hub::api::sync::ApiBuilder;
use ort::session::Session;
use ort::value::Tensor;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::error::{PiiError, Result};
use crate::nlp_engine::{TokenClassifier, TokenLogits};

/// SentencePiece word-boundary marker.
const METASPACE: char = '\u{2581}';

struct ModelFiles {
    model: PathBuf,
    tokenizer: PathBuf,
    config: PathBuf,
}

pub struct OnnxTokenClassifier {
    model_id: String,
    // `Session::run` takes `&mut self`.
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    id2label: BTreeMap<usize, String>,
}

impl OnnxTokenClassifier {
    /// `model_id` is either a local directory or a Hub repository id.
    pub fn from_pretrained(model_id: &str, config: &ModelConfig) -> Result<Self> {
        let files = if Path::new(model_id).is_dir() {
            Self::local_files(model_id)?
        } else {
            Self::download_files(model_id, config)?
        };
        Self::from_files(model_id, &files, config)
    }

    fn local_files(dir: &str) -> Result<ModelFiles> {
        let root = Path::new(dir);
        let model = [root.join("model.onnx"), root.join("onnx").join("model.onnx")]
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| PiiError::model_load(dir, "no model.onnx in directory"))?;

        let files = ModelFiles {
            model,
            tokenizer: root.join("tokenizer.json"),
            config: root.join("config.json"),
        };
        for path in [&files.tokenizer, &files.config] {
            if !path.is_file() {
                return Err(PiiError::model_load(dir, format!("missing {}", path.display())));
            }
        }
        Ok(files)
    }

    fn download_files(model_id: &str, config: &ModelConfig) -> Result<ModelFiles> {
        let mut builder = ApiBuilder::new().with_token(config.resolve_token());
        if let Some(cache_dir) = &config.cache_dir {
            builder = builder.with_cache_dir(cache_dir.clone());
        }
        let api = builder
            .build()
            .map_err(|e| PiiError::model_load(model_id, format!("failed to initialize Hugging Face API: {}", e)))?;
        let repo = api.model(model_id.to_string());

        info!("Fetching model files for '{}'", model_id);

        let model = repo
            .get("model.onnx")
            .or_else(|_| repo.get("onnx/model.onnx"))
            .map_err(|e| PiiError::model_load(model_id, format!("failed to download model.onnx: {}", e)))?;
        let tokenizer = repo
            .get("tokenizer.json")
            .map_err(|e| PiiError::model_load(model_id, format!("failed to download tokenizer.json: {}", e)))?;
        let config = repo
            .get("config.json")
            .map_err(|e| PiiError::model_load(model_id, format!("failed to download config.json: {}", e)))?;

        Ok(ModelFiles {
            model,
            tokenizer,
            config,
        })
    }

    fn from_files(model_id: &str, files: &ModelFiles, config: &ModelConfig) -> Result<Self> {
        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| PiiError::model_load(model_id, format!("failed to load tokenizer: {}", e)))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_length,
                ..TruncationParams::default()
            }))
            .map_err(|e| PiiError::model_load(model_id, format!("invalid truncation settings: {}", e)))?;
        tokenizer.with_padding(None);

        let raw_config = std::fs::read_to_string(&files.config)
            .map_err(|e| PiiError::model_load(model_id, format!("failed to read config.json: {}", e)))?;
        let config_json: serde_json::Value = serde_json::from_str(&raw_config)
            .map_err(|e| PiiError::model_load(model_id, format!("failed to parse config.json: {}", e)))?;
        let id2label = parse_id2label(&config_json);
        if id2label.is_empty() {
            return Err(PiiError::model_load(model_id, "config.json has no id2label mapping"));
        }

        let session = Session::builder()
            .map_err(|e| PiiError::model_load(model_id, format!("failed to create session builder: {}", e)))?
            .with_intra_threads(config.intra_threads)
            .map_err(|e| PiiError::model_load(model_id, format!("failed to set threads: {}", e)))?
            .commit_from_file(&files.model)
            .map_err(|e| PiiError::model_load(model_id, format!("failed to load ONNX model: {}", e)))?;

        debug!(
            "ONNX session ready for '{}' with {} labels, max_length {}",
            model_id,
            id2label.len(),
            config.max_length
        );

        Ok(Self {
            model_id: model_id.to_string(),
            session: Mutex::new(session),
            tokenizer,
            id2label,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Reads the `id2label` object of a Hugging Face `config.json`.
pub(crate) fn parse_id2label(config: &serde_json::Value) -> BTreeMap<usize, String> {
    config
        .get("id2label")
        .and_then(|v| v.as_object())
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(id, label)| Some((id.parse::<usize>().ok()?, label.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// SentencePiece tokens carry a word-boundary marker that never occurs in
/// the input text; strip it so the offset search can find the token.
fn normalize_token(token: &str) -> String {
    token.trim_start_matches(METASPACE).to_string()
}

impl TokenClassifier for OnnxTokenClassifier {
    fn classify(&self, text: &str) -> Result<TokenLogits> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| PiiError::inference(format!("tokenization failed: {}", e)))?;

        let tokens: Vec<String> = encoding.get_tokens().iter().map(|t| normalize_token(t)).collect();
        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let seq_len = input_ids.len();

        let ids_tensor = Tensor::from_array((vec![1i64, seq_len as i64], input_ids))
            .map_err(|e| PiiError::inference(format!("failed to create input_ids tensor: {}", e)))?;
        let mask_tensor = Tensor::from_array((vec![1i64, seq_len as i64], attention_mask))
            .map_err(|e| PiiError::inference(format!("failed to create attention_mask tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| PiiError::inference(format!("session lock poisoned: {}", e)))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => ids_tensor.into_dyn(),
                "attention_mask" => mask_tensor.into_dyn(),
            ])
            .map_err(|e| PiiError::inference(format!("ONNX inference failed: {}", e)))?;

        let logits = outputs
            .get("logits")
            .ok_or_else(|| PiiError::inference("model output does not contain 'logits'"))?;
        let (shape, data) = logits
            .try_extract_tensor::<f32>()
            .map_err(|e| PiiError::inference(format!("failed to extract logits: {}", e)))?;

        if shape.len() != 3 || shape[0] != 1 || shape[1] as usize != seq_len {
            return Err(PiiError::inference(format!("unexpected logits shape: {:?}", shape)));
        }
        let num_labels = shape[2] as usize;
        if num_labels == 0 {
            return Err(PiiError::inference("model produced zero label classes"));
        }

        let rows: Vec<Vec<f32>> = data.chunks(num_labels).map(|row| row.to_vec()).collect();

        Ok(TokenLogits { tokens, logits: rows })
    }

    fn id2label(&self) -> &BTreeMap<usize, String> {
        &self.id2label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp_engine::TransformersNlpEngine;
    use std::sync::Arc;

    #[test]
    fn test_parse_id2label() {
        let config = serde_json::json!({
            "id2label": { "0": "O", "1": "I-GIVENNAME", "2": "I-CITY", "x": "ignored" }
        });

        let labels = parse_id2label(&config);

        assert_eq!(labels.len(), 3);
        assert_eq!(labels[&1], "I-GIVENNAME");
        assert!(parse_id2label(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn test_normalize_token() {
        assert_eq!(normalize_token("\u{2581}Jan"), "Jan");
        assert_eq!(normalize_token("ák"), "ák");
        assert_eq!(normalize_token("##ák"), "##ák");
    }

    #[test]
    fn test_missing_local_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().to_string_lossy().to_string();

        let result = OnnxTokenClassifier::from_pretrained(&path, &ModelConfig::default());

        assert!(matches!(result, Err(PiiError::ModelLoad { .. })));
    }

    /// Downloads the default model; run with `--features onnx -- --ignored`.
    #[test]
    #[ignore]
    fn test_piiranha_end_to_end() {
        let model_id = crate::config::DEFAULT_MODEL;
        let engine = TransformersNlpEngine::new(model_id, |id| {
            Ok(Arc::new(OnnxTokenClassifier::from_pretrained(id, &ModelConfig::default())?)
                as Arc<dyn TokenClassifier>)
        });
        assert!(engine.is_loaded(), "{:?}", engine.load_error());

        let text = "Jmenuji se Jan Novák a můj e-mail je jan.novak@seznam.cz.";
        let artifacts = engine.process_text(text, "cs").unwrap();

        assert_eq!(artifacts.tokens.len(), artifacts.token_offsets.len());
        assert!(!artifacts.entities.is_empty());
        assert!(!engine.supported_entities().unwrap().is_empty());
    }
}
