mod common;

use common::DictionaryClassifier;
use czech_pii_anonymizer_core::{
    annotate_text, anonymize_text, create_analyzer_engine, export_results, highlight_pii, AnalyzerCache,
    AnalyzerEngine, AnonymizerEngine, Config, EntitySpan, ExportFormat, PiiError, Segment, TokenClassifier,
    TransformersNlpEngine,
};
use std::collections::HashMap;
use std::sync::Arc;

fn create_test_cache() -> AnalyzerCache<impl Fn(&str) -> czech_pii_anonymizer_core::Result<AnalyzerEngine> + Send + Sync> {
    let detection = Config::default().detection;
    AnalyzerCache::new(move |model_id: &str| {
        create_analyzer_engine(
            model_id,
            |_| {
                Ok(Arc::new(DictionaryClassifier::new(&[
                    ("Jan", "PERSON"),
                    ("Novák", "PERSON"),
                    ("Eva", "PERSON"),
                    ("Praze", "CITY"),
                    ("Brně", "CITY"),
                ])) as Arc<dyn TokenClassifier>)
            },
            &detection,
        )
    })
}

#[test]
fn test_module_exports() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert!(AnonymizerEngine::from_config(&config.anonymization).is_ok());

    let cache = create_test_cache();
    assert!(cache.is_empty());
    assert_eq!(cache.supported_entities("test/dictionary").unwrap(), vec!["CITY", "PERSON"]);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_pipeline_with_csv_export() {
    let cache = create_test_cache();
    let text = "Eva se přestěhovala z Brně do Praze.";

    let mut spans = cache.analyze("test/dictionary", text, None, 0.5, "cs").unwrap();
    spans.sort_by_key(|s| s.start);

    // The two cities are separated only by non-entity tokens, so they merge.
    assert_eq!(
        spans,
        vec![
            EntitySpan::new("PERSON", 0, 3, 0.85),
            EntitySpan::new("CITY", 22, 35, 0.85),
        ]
    );

    let masked = anonymize_text(text, "mask", &spans, Some('*'), None, None).unwrap();
    assert_eq!(masked, format!("*** se přestěhovala z {}.", "*".repeat(13)));

    let csv = export_results(&masked, &spans, ExportFormat::Csv).unwrap();
    let rows: Vec<&str> = csv.lines().collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1], "PERSON,0,3,0.85,***");
    assert_eq!(rows[2], "CITY,22,35,0.85,*************");
}

#[test]
fn test_per_entity_operators() {
    let cache = create_test_cache();
    let text = "Jan Novák bydlí v Praze.";
    let spans = cache.analyze("test/dictionary", text, None, 0.5, "cs").unwrap();

    let mut overrides = HashMap::new();
    overrides.insert("CITY".to_string(), "odstranění".to_string());

    let anonymized = anonymize_text(text, "replace", &spans, None, None, Some(&overrides)).unwrap();

    assert_eq!(anonymized, "[REDACTED] bydlí v .");
}

#[test]
fn test_highlight_and_annotate() {
    let cache = create_test_cache();
    let text = "Jan bydlí v Praze";
    let spans = cache.analyze("test/dictionary", text, None, 0.5, "cs").unwrap();

    let highlighted = highlight_pii(text, &spans);
    assert!(highlighted.starts_with("<span style='background-color: yellow;' title='PERSON'>Jan</span>"));
    assert!(highlighted.ends_with("title='CITY'>Praze</span>"));

    let segments = annotate_text(text, &spans);
    assert_eq!(segments.len(), 3);
    assert_eq!(segments[1], Segment::Plain(" bydlí v ".to_string()));
}

#[test]
fn test_unsupported_values_fail_fast() {
    let cache = create_test_cache();

    assert!(matches!(
        cache.analyze("test/dictionary", "Jan", None, 0.5, "en"),
        Err(PiiError::UnsupportedLanguage { .. })
    ));
    assert!(matches!(
        anonymize_text("Jan", "encrypt", &[], None, None, None),
        Err(PiiError::InvalidOperator(_))
    ));
    assert!(matches!(
        "pdf".parse::<ExportFormat>(),
        Err(PiiError::UnsupportedExportFormat(_))
    ));
}

#[test]
fn test_batch_processing_is_independent() {
    let engine = TransformersNlpEngine::with_classifier(
        "test/dictionary",
        Arc::new(DictionaryClassifier::new(&[("Praze", "CITY")])),
    );

    let results = engine.process_batch(&["v Praze", "bad\u{0}input", "Praze"], Some("cs"));

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().entities, vec![(2, "CITY".to_string())]);
    assert!(matches!(results[1], Err(PiiError::Inference { .. })));
    assert_eq!(results[2].as_ref().unwrap().entities, vec![(1, "CITY".to_string())]);
}
