//! Analysis orchestration and the per-model engine cache

use moka::sync::Cache;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Config, DetectionConfig, EntitySpan, ModelConfig};
use crate::error::{PiiError, Result};
use crate::nlp_engine::{TokenClassifier, TransformersNlpEngine};
use crate::recognizer::{RecognizerRegistry, TransformersEntityRecognizer};

/// Resolves to the engine's first supported language.
pub const AUTO_LANGUAGE: &str = "auto";

/// An NLP engine together with the recognizers that consume its output.
pub struct AnalyzerEngine {
    nlp_engine: TransformersNlpEngine,
    registry: RecognizerRegistry,
}

impl AnalyzerEngine {
    pub fn new(nlp_engine: TransformersNlpEngine, registry: RecognizerRegistry) -> Self {
        Self {
            nlp_engine,
            registry,
        }
    }

    pub fn nlp_engine(&self) -> &TransformersNlpEngine {
        &self.nlp_engine
    }

    pub fn registry(&self) -> &RecognizerRegistry {
        &self.registry
    }

    pub fn resolve_language(&self, language: &str) -> Result<String> {
        let supported = self.nlp_engine.supported_languages();

        if language.eq_ignore_ascii_case(AUTO_LANGUAGE) {
            return supported.first().cloned().ok_or_else(|| PiiError::UnsupportedLanguage {
                language: language.to_string(),
                supported: Vec::new(),
            });
        }

        supported
            .iter()
            .find(|l| l.eq_ignore_ascii_case(language))
            .cloned()
            .ok_or_else(|| PiiError::UnsupportedLanguage {
                language: language.to_string(),
                supported: supported.to_vec(),
            })
    }

    /// Runs every registered recognizer for `language` and keeps the spans
    /// that score at least `threshold` and lie inside `text`.
    ///
    /// The result is in recognizer order, not sorted by position.
    pub fn analyze(
        &self,
        text: &str,
        entities: Option<&[String]>,
        language: &str,
        threshold: f64,
    ) -> Result<Vec<EntitySpan>> {
        if text.is_empty() {
            debug!("Empty input, nothing to analyze");
            return Ok(Vec::new());
        }

        let language = self.resolve_language(language)?;
        let artifacts = self.nlp_engine.process_text(text, &language)?;
        let text_len = text.chars().count();

        let mut results = Vec::new();
        for recognizer in self.registry.get_recognizers(&language) {
            let spans = recognizer.analyze(text, entities, Some(&artifacts));
            debug!("Recognizer '{}' returned {} span(s)", recognizer.name(), spans.len());

            for span in spans {
                if span.score < threshold {
                    continue;
                }
                if !span.is_within(text_len) {
                    debug!(
                        "Dropping out-of-bounds span {} [{}, {}) for text of length {}",
                        span.entity_type, span.start, span.end, text_len
                    );
                    continue;
                }
                results.push(span);
            }
        }

        info!(
            "Detected {} entities in {} characters (threshold {:.2})",
            results.len(),
            text_len,
            threshold
        );

        Ok(results)
    }

    /// Every entity type any recognizer for `language` can report.
    pub fn supported_entities(&self, language: &str) -> Result<Vec<String>> {
        let language = self.resolve_language(language)?;
        Ok(self.registry.supported_entities(&language))
    }
}

/// Models of this family ship without pattern-based coverage for structured
/// identifiers, so they get the predefined recognizers as well.
pub fn is_piiranha_model(model_id: &str) -> bool {
    model_id.to_lowercase().contains("piiranha")
}

/// Builds an analyzer for `model_id`.
///
/// A model that fails to load is an error here, so it never reaches a cache.
pub fn create_analyzer_engine<L>(
    model_id: &str,
    loader: L,
    detection: &DetectionConfig,
) -> Result<AnalyzerEngine>
where
    L: FnOnce(&str) -> Result<Arc<dyn TokenClassifier>>,
{
    let nlp_engine = TransformersNlpEngine::new(model_id, loader);
    if let Some(reason) = nlp_engine.load_error() {
        return Err(PiiError::model_load(model_id, reason));
    }

    let model_entities = nlp_engine.supported_entities()?;
    let mut registry = RecognizerRegistry::new();

    for language in nlp_engine.supported_languages() {
        registry.add_recognizer(Box::new(TransformersEntityRecognizer::new(
            model_entities.clone(),
            language,
        )));

        if detection.predefined_recognizers && is_piiranha_model(model_id) {
            registry.load_predefined_recognizers(language);
        }

        if let Err(e) = registry.add_pattern_recognizers(&detection.patterns, language) {
            warn!("Skipping configured patterns: {}", e);
        }
    }

    info!(
        "Analyzer for '{}' ready with {} recognizer(s)",
        model_id,
        registry.len()
    );

    Ok(AnalyzerEngine::new(nlp_engine, registry))
}

/// Loads the token classifier for `model_id` with the configured backend.
#[cfg(feature = "onnx")]
pub fn load_token_classifier(model_id: &str, config: &ModelConfig) -> Result<Arc<dyn TokenClassifier>> {
    let classifier = crate::onnx::OnnxTokenClassifier::from_pretrained(model_id, config)?;
    Ok(Arc::new(classifier))
}

#[cfg(not(feature = "onnx"))]
pub fn load_token_classifier(model_id: &str, _config: &ModelConfig) -> Result<Arc<dyn TokenClassifier>> {
    Err(PiiError::model_load(
        model_id,
        "no inference backend available (build with the `onnx` feature)",
    ))
}

pub trait EngineFactory: Send + Sync {
    fn create(&self, model_id: &str) -> Result<AnalyzerEngine>;
}

impl<F> EngineFactory for F
where
    F: Fn(&str) -> Result<AnalyzerEngine> + Send + Sync,
{
    fn create(&self, model_id: &str) -> Result<AnalyzerEngine> {
        self(model_id)
    }
}

/// Builds analyzers from the application configuration.
pub struct TransformerEngineFactory {
    config: Config,
}

impl TransformerEngineFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl EngineFactory for TransformerEngineFactory {
    fn create(&self, model_id: &str) -> Result<AnalyzerEngine> {
        create_analyzer_engine(
            model_id,
            |id| load_token_classifier(id, &self.config.model),
            &self.config.detection,
        )
    }
}

/// Model-keyed get-or-create cache.
///
/// Concurrent callers for the same model share one construction; a failed
/// construction is not stored, so the next call retries. Entries are never
/// evicted.
pub struct AnalyzerCache<F: EngineFactory> {
    factory: F,
    engines: Cache<String, Arc<AnalyzerEngine>>,
    entities: Cache<String, Vec<String>>,
}

impl<F: EngineFactory> AnalyzerCache<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            engines: Cache::builder().build(),
            entities: Cache::builder().build(),
        }
    }

    pub fn get_or_create(&self, model_id: &str) -> Result<Arc<AnalyzerEngine>> {
        if let Some(engine) = self.engines.get(model_id) {
            debug!("Analyzer cache hit for '{}'", model_id);
            return Ok(engine);
        }

        self.engines
            .try_get_with(model_id.to_string(), || {
                info!("Analyzer cache miss for '{}', constructing engine", model_id);
                self.factory.create(model_id).map(Arc::new)
            })
            .map_err(|e| unshare_error(model_id, e))
    }

    /// Entity types supported by `model_id` in its default language.
    pub fn supported_entities(&self, model_id: &str) -> Result<Vec<String>> {
        self.entities
            .try_get_with(model_id.to_string(), || {
                self.get_or_create(model_id)?.supported_entities(AUTO_LANGUAGE)
            })
            .map_err(|e| unshare_error(model_id, e))
    }

    /// Analyzes `text` with the cached engine for `model_id`.
    ///
    /// Empty text returns no spans without constructing an engine.
    pub fn analyze(
        &self,
        model_id: &str,
        text: &str,
        entities: Option<&[String]>,
        threshold: f64,
        language: &str,
    ) -> Result<Vec<EntitySpan>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let engine = self.get_or_create(model_id)?;
        engine.analyze(text, entities, language, threshold)
    }

    pub fn len(&self) -> usize {
        self.engines.run_pending_tasks();
        self.engines.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The cache hands every waiting caller the same shared error.
fn unshare_error(model_id: &str, error: Arc<PiiError>) -> PiiError {
    Arc::try_unwrap(error).unwrap_or_else(|shared| match shared.as_ref() {
        PiiError::ModelLoad { model, reason } => PiiError::model_load(model, reason),
        PiiError::Inference { reason } => PiiError::inference(reason),
        PiiError::UnsupportedLanguage { language, supported } => PiiError::UnsupportedLanguage {
            language: language.clone(),
            supported: supported.clone(),
        },
        other => PiiError::model_load(model_id, other),
    })
}
