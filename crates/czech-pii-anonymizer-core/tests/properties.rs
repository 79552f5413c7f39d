mod common;

use common::DictionaryClassifier;
use czech_pii_anonymizer_core::{
    convert_tokens_to_text_positions, create_analyzer_engine, AnalyzerEngine, AnonymizeOptions, AnonymizerEngine,
    Config, EntitySpan, OperatorTable, TokenClassifier,
};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

fn capitalized_engine() -> AnalyzerEngine {
    let detection = Config::default().detection;
    create_analyzer_engine(
        "test/capitalized",
        |_| {
            Ok(Arc::new(DictionaryClassifier::new(&[("Praha", "CITY")]).with_capitalized_as("PERSON"))
                as Arc<dyn TokenClassifier>)
        },
        &detection,
    )
    .unwrap()
}

fn engine_for(operator: &str, options: AnonymizeOptions) -> AnonymizerEngine {
    AnonymizerEngine::new(OperatorTable::build(operator, &options, &HashMap::new()).unwrap())
}

fn char_count(s: &str) -> usize {
    s.chars().count()
}

fn chars(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

proptest! {
    #[test]
    fn offsets_never_decrease(
        tokens in prop::collection::vec("(##)?[a-zčřž]{0,4}|\\[UNK\\]", 0..24),
        text in "[a-zčřž .]{0,60}",
    ) {
        let positions = convert_tokens_to_text_positions(&tokens, &text);

        prop_assert_eq!(positions.len(), tokens.len());
        for i in 1..positions.len() {
            if tokens[i].starts_with("##") {
                prop_assert_eq!(positions[i], positions[i - 1]);
            } else {
                prop_assert!(positions[i] >= positions[i - 1]);
            }
        }
        prop_assert!(positions.iter().all(|&p| p <= char_count(&text)));
    }

    #[test]
    fn analyzed_spans_stay_in_bounds(text in "[A-Za-zČŘŽáéíčřž ,.]{0,80}") {
        let engine = capitalized_engine();

        let spans = engine.analyze(&text, None, "cs", 0.0).unwrap();

        let len = char_count(&text);
        for span in &spans {
            prop_assert!(span.start < span.end, "{:?}", span);
            prop_assert!(span.end <= len, "{:?} for length {}", span, len);
        }
    }

    #[test]
    fn mask_preserves_span_length(
        text in "[a-zá-ž ]{1,40}",
        start_seed in 0usize..40,
        len_seed in 1usize..40,
        k in 0usize..50,
        from_end in any::<bool>(),
    ) {
        let text_len = char_count(&text);
        let start = start_seed % text_len;
        let end = (start + len_seed).min(text_len).max(start + 1);
        let span_len = end - start;
        let engine = engine_for("mask", AnonymizeOptions {
            mask_char: '*',
            chars_to_mask: Some(k),
            from_end,
            ..AnonymizeOptions::default()
        });

        let out = engine.anonymize(&text, &[EntitySpan::new("X", start, end, 0.9)]).text;

        prop_assert_eq!(char_count(&out), text_len);
        let segment = chars(&out, start, end);
        prop_assert_eq!(segment.chars().filter(|&c| c == '*').count(), k.min(span_len));
        prop_assert_eq!(chars(&out, 0, start), chars(&text, 0, start));
        prop_assert_eq!(chars(&out, end, text_len), chars(&text, end, text_len));
    }

    #[test]
    fn delete_and_replace_leave_other_text_alone(
        text in "[a-zá-ž .]{4,60}",
        cuts in prop::collection::vec(0usize..60, 4),
        replace in any::<bool>(),
    ) {
        let text_len = char_count(&text);
        let mut points: Vec<usize> = cuts.iter().map(|c| c % (text_len + 1)).collect();
        points.sort_unstable();
        let (s1, e1, s2, e2) = (points[0], points[1], points[2], points[3]);
        prop_assume!(s1 < e1 && s2 < e2);

        let operator = if replace { "replace" } else { "delete" };
        let engine = engine_for(operator, AnonymizeOptions::default());
        let spans = vec![EntitySpan::new("A", s1, e1, 0.9), EntitySpan::new("B", s2, e2, 0.9)];

        let out = engine.anonymize(&text, &spans).text;

        let value = if replace { "[REDACTED]" } else { "" };
        let expected = format!(
            "{}{}{}{}{}",
            chars(&text, 0, s1),
            value,
            chars(&text, e1, s2),
            value,
            chars(&text, e2, text_len),
        );
        prop_assert_eq!(out, expected);
    }
}
