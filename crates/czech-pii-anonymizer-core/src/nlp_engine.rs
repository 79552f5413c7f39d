//! Transformer NLP engine
//!
//! Runs a token-classification model over a text and turns its output into
//! [`NlpArtifacts`]: the sub-word tokens, the entity-bearing `(token index, label)`
//! pairs and a best-effort character offset for every token.
//!
//! The model itself sits behind [`TokenClassifier`], so the engine does not care
//! whether predictions come from ONNX Runtime or from an in-memory stub.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::DEFAULT_LANGUAGE;
use crate::error::{PiiError, Result};

/// Marks a WordPiece token that continues the previous one without a space.
pub const CONTINUATION_PREFIX: &str = "##";

/// Class index reserved for "not an entity".
pub const NO_ENTITY_CLASS: usize = 0;

/// Raw output of one forward pass: the tokenizer's tokens and one score
/// vector (over tag classes) per token.
#[derive(Debug, Clone, Default)]
pub struct TokenLogits {
    pub tokens: Vec<String>,
    pub logits: Vec<Vec<f32>>,
}

pub trait TokenClassifier: Send + Sync {
    /// Tokenizes `text` (with truncation) and runs a single inference-only
    /// forward pass.
    fn classify(&self, text: &str) -> Result<TokenLogits>;

    /// Class index -> tag label, as shipped with the model.
    fn id2label(&self) -> &BTreeMap<usize, String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct NlpArtifacts {
    /// `(token index, tag label)` for every token not predicted as class 0.
    pub entities: Vec<(usize, String)>,
    pub tokens: Vec<String>,
    /// Approximate start offset (in characters) of each token, parallel to `tokens`.
    pub token_offsets: Vec<usize>,
    pub language: String,
}

/// Reconstructs approximate character offsets for `tokens` within `text`.
///
/// Continuation tokens inherit the offset of the token they continue. Any
/// other token is searched for literally from the scan cursor; when it cannot
/// be found (special tokens, `[UNK]`, normalized text) it gets the cursor
/// position and the cursor stays put. This never fails.
pub fn convert_tokens_to_text_positions<S: AsRef<str>>(tokens: &[S], text: &str) -> Vec<usize> {
    let mut positions: Vec<usize> = Vec::with_capacity(tokens.len());
    let mut byte_cursor = 0;
    let mut char_cursor = 0;

    for token in tokens {
        let token = token.as_ref();

        if token.starts_with(CONTINUATION_PREFIX) {
            let previous = positions.last().copied().unwrap_or(char_cursor);
            positions.push(previous);
            continue;
        }

        match text[byte_cursor..].find(token) {
            Some(relative) => {
                let start = char_cursor + text[byte_cursor..byte_cursor + relative].chars().count();
                positions.push(start);
                byte_cursor += relative + token.len();
                char_cursor = start + token.chars().count();
            }
            None => positions.push(char_cursor),
        }
    }

    positions
}

/// Index of the highest score; the first one wins ties. An empty row is
/// treated as "not an entity".
pub fn argmax(scores: &[f32]) -> usize {
    let mut best_idx = NO_ENTITY_CLASS;
    let mut best_val = f32::NEG_INFINITY;
    for (idx, &val) in scores.iter().enumerate() {
        if val > best_val {
            best_val = val;
            best_idx = idx;
        }
    }
    best_idx
}

enum ModelState {
    Loaded(Arc<dyn TokenClassifier>),
    NotLoaded { reason: String },
}

pub struct TransformersNlpEngine {
    model_id: String,
    state: ModelState,
    stopwords: HashSet<String>,
    supported_languages: Vec<String>,
}

impl TransformersNlpEngine {
    /// Builds the engine with `loader`. A loader failure is logged and leaves
    /// the engine in the not-loaded state instead of being returned.
    pub fn new<F>(model_id: &str, loader: F) -> Self
    where
        F: FnOnce(&str) -> Result<Arc<dyn TokenClassifier>>,
    {
        let state = match loader(model_id) {
            Ok(classifier) => {
                info!("Loaded token classification model '{}'", model_id);
                ModelState::Loaded(classifier)
            }
            Err(e) => {
                error!("Error loading model '{}': {}", model_id, e);
                ModelState::NotLoaded { reason: e.to_string() }
            }
        };

        Self {
            model_id: model_id.to_string(),
            state,
            stopwords: HashSet::new(),
            supported_languages: vec![DEFAULT_LANGUAGE.to_string()],
        }
    }

    pub fn with_classifier(model_id: &str, classifier: Arc<dyn TokenClassifier>) -> Self {
        Self::new(model_id, |_| Ok(classifier))
    }

    pub fn with_supported_languages(mut self, languages: Vec<String>) -> Self {
        self.supported_languages = languages;
        self
    }

    pub fn set_stopwords<I, S>(&mut self, stopwords: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stopwords = stopwords
            .into_iter()
            .map(|w| w.as_ref().to_lowercase())
            .collect();
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, ModelState::Loaded(_))
    }

    pub fn load_error(&self) -> Option<&str> {
        match &self.state {
            ModelState::Loaded(_) => None,
            ModelState::NotLoaded { reason } => Some(reason),
        }
    }

    fn classifier(&self) -> Result<&Arc<dyn TokenClassifier>> {
        match &self.state {
            ModelState::Loaded(classifier) => Ok(classifier),
            ModelState::NotLoaded { reason } => Err(PiiError::model_load(&self.model_id, reason)),
        }
    }

    pub fn process_text(&self, text: &str, language: &str) -> Result<NlpArtifacts> {
        let classifier = self.classifier()?;
        let output = classifier.classify(text)?;

        if output.logits.len() != output.tokens.len() {
            return Err(PiiError::inference(format!(
                "model returned {} score rows for {} tokens",
                output.logits.len(),
                output.tokens.len()
            )));
        }

        let id2label = classifier.id2label();
        let entities: Vec<(usize, String)> = output
            .logits
            .iter()
            .enumerate()
            .filter_map(|(i, scores)| {
                let predicted = argmax(scores);
                if predicted == NO_ENTITY_CLASS {
                    return None;
                }
                let label = id2label
                    .get(&predicted)
                    .cloned()
                    .unwrap_or_else(|| format!("LABEL_{}", predicted));
                Some((i, label))
            })
            .collect();

        let token_offsets = convert_tokens_to_text_positions(&output.tokens, text);

        debug!(
            "Processed {} characters into {} tokens, {} entity tokens",
            text.chars().count(),
            output.tokens.len(),
            entities.len()
        );

        Ok(NlpArtifacts {
            entities,
            tokens: output.tokens,
            token_offsets,
            language: language.to_string(),
        })
    }

    /// Processes each text on its own; one failure does not affect the others.
    pub fn process_batch(&self, texts: &[&str], language: Option<&str>) -> Vec<Result<NlpArtifacts>> {
        let language = language.unwrap_or(DEFAULT_LANGUAGE);
        texts
            .iter()
            .map(|text| self.process_text(text, language))
            .collect()
    }

    pub fn is_stopword(&self, word: &str, _language: &str) -> bool {
        self.stopwords.contains(&word.to_lowercase())
    }

    pub fn is_punct(&self, token: &str, _language: &str) -> bool {
        token.chars().all(|c| !c.is_alphanumeric())
    }

    /// Tag labels the model can emit, without the "no entity" class.
    pub fn supported_entities(&self) -> Result<Vec<String>> {
        let classifier = self.classifier()?;
        let labels: BTreeSet<String> = classifier
            .id2label()
            .iter()
            .filter(|(id, _)| **id != NO_ENTITY_CLASS)
            .map(|(_, label)| label.clone())
            .collect();
        Ok(labels.into_iter().collect())
    }

    pub fn supported_languages(&self) -> &[String] {
        &self.supported_languages
    }
}
