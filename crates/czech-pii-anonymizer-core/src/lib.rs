pub mod analyzer;
pub mod anonymizer;
pub mod config;
pub mod error;
pub mod export;
pub mod nlp_engine;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod recognizer;


pub use analyzer::{
    create_analyzer_engine, load_token_classifier, AnalyzerCache, AnalyzerEngine, EngineFactory,
    TransformerEngineFactory,
};
pub use anonymizer::{
    anonymize_text, resolve_conflicts, AnonymizeOptions, AnonymizerEngine, AnonymizerResult, OperatorKind,
    OperatorResult, OperatorSpec, OperatorTable,
};
pub use config::{AnonymizationConfig, Config, DetectionConfig, EntitySpan, ModelConfig};
pub use error::{PiiError, Result};
pub use export::{
    annotate_text, calculate_anonymization_accuracy, export_results, highlight_pii, ExportFormat, Segment,
};
pub use nlp_engine::{convert_tokens_to_text_positions, NlpArtifacts, TokenClassifier, TokenLogits, TransformersNlpEngine};
#[cfg(feature = "onnx")]
pub use onnx::OnnxTokenClassifier;
pub use recognizer::{
    resolve_spans, EntityRecognizer, PatternRecognizer, RecognizerRegistry, TransformersEntityRecognizer,
};
