//! Export formats and presentation helpers

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::anonymizer::{char_boundaries, resolve_conflicts};
use crate::config::EntitySpan;
use crate::error::{PiiError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Txt,
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = PiiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "txt" | "text" => Ok(Self::Txt),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(PiiError::UnsupportedExportFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Txt => "txt",
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    anonymized_text: &'a str,
    detected_pii: &'a [EntitySpan],
}

/// Characters `[start, end)` of `text`, clamped to its length.
fn char_slice(text: &str, start: usize, end: usize) -> &str {
    let boundaries = char_boundaries(text);
    let last = boundaries.len() - 1;
    let start = start.min(last);
    let end = end.clamp(start, last);
    &text[boundaries[start]..boundaries[end]]
}

/// Serializes an anonymization run.
///
/// The CSV "Anonymized Value" column slices the anonymized text with the
/// original offsets, so it only lines up with the replacement when the
/// operator preserves length.
pub fn export_results(anonymized_text: &str, spans: &[EntitySpan], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Txt => Ok(anonymized_text.to_string()),
        ExportFormat::Json => {
            let document = ExportDocument {
                anonymized_text,
                detected_pii: spans,
            };
            Ok(serde_json::to_string_pretty(&document)?)
        }
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer.write_record(["Entity Type", "Start", "End", "Score", "Anonymized Value"])?;
            for span in spans {
                writer.write_record(&[
                    span.entity_type.clone(),
                    span.start.to_string(),
                    span.end.to_string(),
                    span.score.to_string(),
                    char_slice(anonymized_text, span.start, span.end).to_string(),
                ])?;
            }
            let bytes = writer
                .into_inner()
                .map_err(|e| PiiError::Csv(e.into_error().into()))?;
            String::from_utf8(bytes).map_err(|e| {
                PiiError::Csv(std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
            })
        }
    }
}

/// Wraps every in-bounds span in a highlighted HTML `<span>`, right to left
/// so earlier offsets stay valid.
pub fn highlight_pii(text: &str, spans: &[EntitySpan]) -> String {
    let boundaries = char_boundaries(text);
    let text_len = boundaries.len() - 1;

    let mut ordered: Vec<&EntitySpan> = spans.iter().filter(|s| s.is_within(text_len)).collect();
    ordered.sort_by(|a, b| b.start.cmp(&a.start));

    let mut highlighted = text.to_string();
    let mut limit = text_len;
    for span in ordered {
        // Nested or overlapping spans would split an already inserted tag.
        if span.end > limit {
            continue;
        }
        let (start, end) = (boundaries[span.start], boundaries[span.end]);
        let wrapped = format!(
            "<span style='background-color: yellow;' title='{}'>{}</span>",
            span.entity_type,
            &text[start..end]
        );
        highlighted.replace_range(start..end, &wrapped);
        limit = span.start;
    }

    highlighted
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Plain(String),
    Entity { text: String, entity_type: String },
}

/// Splits `text` into plain and entity segments, using the same conflict
/// resolution the anonymizer applies.
pub fn annotate_text(text: &str, spans: &[EntitySpan]) -> Vec<Segment> {
    let boundaries = char_boundaries(text);
    let resolved = resolve_conflicts(spans, boundaries.len() - 1);

    let mut segments = Vec::with_capacity(resolved.len() * 2 + 1);
    let mut cursor = 0;
    for span in &resolved {
        if span.start > cursor {
            segments.push(Segment::Plain(text[boundaries[cursor]..boundaries[span.start]].to_string()));
        }
        segments.push(Segment::Entity {
            text: text[boundaries[span.start]..boundaries[span.end]].to_string(),
            entity_type: span.entity_type.clone(),
        });
        cursor = span.end;
    }
    if cursor < boundaries.len() - 1 {
        segments.push(Segment::Plain(text[boundaries[cursor]..].to_string()));
    }

    segments
}

/// Fraction of spans whose original-offset slice changed. 1.0 without spans.
pub fn calculate_anonymization_accuracy(original: &str, anonymized: &str, spans: &[EntitySpan]) -> f64 {
    if spans.is_empty() {
        return 1.0;
    }

    let changed = spans
        .iter()
        .filter(|s| char_slice(original, s.start, s.end) != char_slice(anonymized, s.start, s.end))
        .count();

    changed as f64 / spans.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGINAL: &str = "Jan Novák bydlí v Praze.";
    const ANONYMIZED: &str = "[REDACTED] bydlí v Praze.";

    fn create_test_spans() -> Vec<EntitySpan> {
        vec![EntitySpan::new("PERSON", 0, 9, 0.85)]
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("txt".parse::<ExportFormat>().unwrap(), ExportFormat::Txt);
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);

        match "xml".parse::<ExportFormat>() {
            Err(PiiError::UnsupportedExportFormat(name)) => assert_eq!(name, "xml"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_export_txt() {
        let out = export_results(ANONYMIZED, &create_test_spans(), ExportFormat::Txt).unwrap();
        assert_eq!(out, ANONYMIZED);
    }

    #[test]
    fn test_export_json() {
        let out = export_results(ANONYMIZED, &create_test_spans(), ExportFormat::Json).unwrap();

        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["anonymized_text"], ANONYMIZED);
        assert_eq!(value["detected_pii"][0]["entity_type"], "PERSON");
        assert_eq!(value["detected_pii"][0]["start"], 0);
        assert_eq!(value["detected_pii"][0]["end"], 9);
        assert_eq!(value["detected_pii"][0]["score"], 0.85);
        assert!(out.contains("bydlí"));
    }

    #[test]
    fn test_export_csv_slices_with_original_offsets() {
        let out = export_results(ANONYMIZED, &create_test_spans(), ExportFormat::Csv).unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Entity Type,Start,End,Score,Anonymized Value");
        assert_eq!(lines[1], "PERSON,0,9,0.85,[REDACTED");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_export_csv_clamps_offsets() {
        let spans = vec![EntitySpan::new("CITY", 18, 40, 0.85)];

        let out = export_results("krátký", &spans, ExportFormat::Csv).unwrap();

        assert!(out.lines().nth(1).unwrap().ends_with(",0.85,"));
    }

    #[test]
    fn test_highlight_pii() {
        let spans = vec![
            EntitySpan::new("PERSON", 0, 9, 0.85),
            EntitySpan::new("CITY", 18, 23, 0.85),
            EntitySpan::new("BROKEN", 20, 99, 0.85),
        ];

        let out = highlight_pii(ORIGINAL, &spans);

        assert_eq!(
            out,
            "<span style='background-color: yellow;' title='PERSON'>Jan Novák</span> bydlí v \
             <span style='background-color: yellow;' title='CITY'>Praze</span>."
        );
    }

    #[test]
    fn test_annotate_text() {
        let spans = vec![
            EntitySpan::new("CITY", 18, 23, 0.85),
            EntitySpan::new("PERSON", 0, 9, 0.85),
        ];

        let segments = annotate_text(ORIGINAL, &spans);

        assert_eq!(
            segments,
            vec![
                Segment::Entity {
                    text: "Jan Novák".to_string(),
                    entity_type: "PERSON".to_string()
                },
                Segment::Plain(" bydlí v ".to_string()),
                Segment::Entity {
                    text: "Praze".to_string(),
                    entity_type: "CITY".to_string()
                },
                Segment::Plain(".".to_string()),
            ]
        );
        assert_eq!(annotate_text("bez osob", &[]), vec![Segment::Plain("bez osob".to_string())]);
    }

    #[test]
    fn test_anonymization_accuracy() {
        let spans = create_test_spans();

        assert_eq!(calculate_anonymization_accuracy(ORIGINAL, ANONYMIZED, &spans), 1.0);
        assert_eq!(calculate_anonymization_accuracy(ORIGINAL, ORIGINAL, &spans), 0.0);
        assert_eq!(calculate_anonymization_accuracy(ORIGINAL, ORIGINAL, &[]), 1.0);

        let two = vec![
            EntitySpan::new("PERSON", 0, 9, 0.85),
            EntitySpan::new("CITY", 18, 23, 0.85),
        ];
        let masked = "****Novák bydlí v Praze.";
        assert_eq!(calculate_anonymization_accuracy(ORIGINAL, masked, &two), 0.5);
    }
}
