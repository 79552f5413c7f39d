//! Entity recognizers
//!
//! Every backend implements [`EntityRecognizer`], so the analyzer can run a
//! transformer-backed recognizer next to rule-based ones without knowing which
//! is which.

use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::config::EntitySpan;
use crate::nlp_engine::NlpArtifacts;

/// Score assigned to transformer spans. The model's probabilities are not
/// propagated.
pub const TRANSFORMER_SCORE: f64 = 0.85;

/// Score for user-supplied patterns without a dedicated heuristic.
pub const DEFAULT_PATTERN_SCORE: f64 = 0.8;

pub trait EntityRecognizer: Send + Sync {
    fn name(&self) -> &str;

    fn supported_entities(&self) -> &[String];

    fn supported_language(&self) -> &str;

    /// Returns spans in character offsets of `text`. When `entities` is a
    /// non-empty list, spans of other types are left out.
    fn analyze(
        &self,
        text: &str,
        entities: Option<&[String]>,
        artifacts: Option<&NlpArtifacts>,
    ) -> Vec<EntitySpan>;
}

/// An empty request means every supported type.
fn is_requested(entity_type: &str, entities: Option<&[String]>) -> bool {
    entities.map_or(true, |wanted| wanted.is_empty() || wanted.iter().any(|e| e == entity_type))
}

/// Merges entity-bearing tokens into spans.
///
/// A run extends while the next entry of `artifacts.entities` carries the
/// identical label. Adjacency is measured in that filtered list, not in the
/// token stream, so two same-label mentions separated only by non-entity
/// tokens end up in one span. The span runs from the first token's offset to
/// the last token's offset plus that token's length.
pub fn resolve_spans(artifacts: &NlpArtifacts, score: f64) -> Vec<EntitySpan> {
    let mentions = &artifacts.entities;
    let mut spans = Vec::new();
    let mut run_start = 0;

    while run_start < mentions.len() {
        let label = &mentions[run_start].1;
        let mut run_end = run_start + 1;
        while run_end < mentions.len() && mentions[run_end].1 == *label {
            run_end += 1;
        }

        let first_token = mentions[run_start].0;
        let last_token = mentions[run_end - 1].0;

        match (
            artifacts.token_offsets.get(first_token),
            artifacts.token_offsets.get(last_token),
            artifacts.tokens.get(last_token),
        ) {
            (Some(&start), Some(&last_offset), Some(last_text)) => {
                spans.push(EntitySpan::new(
                    label.clone(),
                    start,
                    last_offset + last_text.chars().count(),
                    score,
                ));
            }
            _ => debug!(
                "Skipping '{}' run over tokens {}..={}: no offset information",
                label, first_token, last_token
            ),
        }

        run_start = run_end;
    }

    spans
}

/// Adapts the transformer NLP engine output to the recognizer interface.
pub struct TransformersEntityRecognizer {
    name: String,
    supported_entities: Vec<String>,
    supported_language: String,
    score: f64,
}

impl TransformersEntityRecognizer {
    pub fn new(supported_entities: Vec<String>, supported_language: &str) -> Self {
        Self {
            name: "TransformersEntityRecognizer".to_string(),
            supported_entities,
            supported_language: supported_language.to_string(),
            score: TRANSFORMER_SCORE,
        }
    }
}

impl EntityRecognizer for TransformersEntityRecognizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_entities(&self) -> &[String] {
        &self.supported_entities
    }

    fn supported_language(&self) -> &str {
        &self.supported_language
    }

    fn analyze(
        &self,
        _text: &str,
        entities: Option<&[String]>,
        artifacts: Option<&NlpArtifacts>,
    ) -> Vec<EntitySpan> {
        let Some(artifacts) = artifacts else {
            return Vec::new();
        };

        resolve_spans(artifacts, self.score)
            .into_iter()
            .filter(|span| is_requested(&span.entity_type, entities))
            .collect()
    }
}

/// Regex-based recognizer for a single entity type.
#[derive(Clone)]
pub struct PatternRecognizer {
    name: String,
    supported_entities: Vec<String>,
    supported_language: String,
    patterns: Vec<Regex>,
}

impl PatternRecognizer {
    pub fn new(entity_type: &str, patterns: &[&str], language: &str) -> Result<Self, regex::Error> {
        let compiled = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Loaded {} regex pattern(s) for '{}'", compiled.len(), entity_type);

        Ok(Self {
            name: format!("{}Recognizer", entity_type),
            supported_entities: vec![entity_type.to_string()],
            supported_language: language.to_string(),
            patterns: compiled,
        })
    }

    fn entity_type(&self) -> &str {
        &self.supported_entities[0]
    }

    // Cheap validity checks; a match that fails them is kept with a score
    // low enough to fall under the usual thresholds.
    fn calculate_confidence(&self, matched: &str) -> f64 {
        match self.entity_type() {
            "EMAIL_ADDRESS" => {
                if matched.contains('@') && matched.contains('.') {
                    0.95
                } else {
                    0.7
                }
            }
            "PHONE_NUMBER" => {
                let digit_count = matched.chars().filter(|c| c.is_ascii_digit()).count();
                if matched.starts_with("+420") && digit_count == 12 {
                    0.9
                } else if digit_count == 9 {
                    0.75
                } else {
                    0.4
                }
            }
            "CZ_BIRTH_NUMBER" => {
                if birth_number_checksum_ok(matched) {
                    0.95
                } else if matched.contains('/') {
                    0.6
                } else {
                    0.3
                }
            }
            "IBAN_CODE" => {
                if iban_checksum_ok(matched) {
                    0.95
                } else {
                    0.3
                }
            }
            "CREDIT_CARD" => {
                if luhn_ok(matched) {
                    0.9
                } else {
                    0.2
                }
            }
            "IP_ADDRESS" => {
                let parts: Vec<&str> = matched.split('.').collect();
                if parts.len() == 4 && parts.iter().all(|&p| p.parse::<u8>().is_ok()) {
                    0.95
                } else {
                    0.7
                }
            }
            "URL" => {
                if matched.starts_with("http://") || matched.starts_with("https://") {
                    0.9
                } else {
                    0.7
                }
            }
            _ => DEFAULT_PATTERN_SCORE,
        }
    }
}

impl EntityRecognizer for PatternRecognizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_entities(&self) -> &[String] {
        &self.supported_entities
    }

    fn supported_language(&self) -> &str {
        &self.supported_language
    }

    fn analyze(
        &self,
        text: &str,
        entities: Option<&[String]>,
        _artifacts: Option<&NlpArtifacts>,
    ) -> Vec<EntitySpan> {
        if !is_requested(self.entity_type(), entities) {
            return Vec::new();
        }

        let mut spans = Vec::new();
        for regex in &self.patterns {
            for mat in regex.find_iter(text) {
                if mat.as_str().is_empty() {
                    continue;
                }
                let start = text[..mat.start()].chars().count();
                let end = start + mat.as_str().chars().count();
                spans.push(EntitySpan::new(
                    self.entity_type(),
                    start,
                    end,
                    self.calculate_confidence(mat.as_str()),
                ));
            }
        }

        spans.sort_by_key(|s| s.start);
        spans
    }
}

/// Rule-based recognizers for identifiers common in Czech documents.
pub fn predefined_recognizers(language: &str) -> Vec<PatternRecognizer> {
    let definitions: [(&str, &[&str]); 7] = [
        (
            "EMAIL_ADDRESS",
            &[r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"],
        ),
        (
            "PHONE_NUMBER",
            &[r"(?:\+420 ?)?\b[1-9]\d{2} ?\d{3} ?\d{3}\b"],
        ),
        ("CZ_BIRTH_NUMBER", &[r"\b\d{6}/?\d{3,4}\b"]),
        (
            "IBAN_CODE",
            &[r"\b[A-Z]{2}\d{2}(?: ?[A-Z0-9]{4}){3,7}(?: ?[A-Z0-9]{1,3})?\b"],
        ),
        (
            "IP_ADDRESS",
            &[r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b"],
        ),
        (
            "URL",
            &[r#"\b(?:https?://|www\.)[^\s<>"]*[^\s<>".,;:!?)]"#],
        ),
        ("CREDIT_CARD", &[r"\b(?:\d[ -]?){12,18}\d\b"]),
    ];

    definitions
        .iter()
        .filter_map(|(entity_type, patterns)| {
            match PatternRecognizer::new(entity_type, patterns, language) {
                Ok(recognizer) => Some(recognizer),
                Err(e) => {
                    warn!("Invalid predefined pattern for '{}': {}", entity_type, e);
                    None
                }
            }
        })
        .collect()
}

/// Czech birth number checksum: the ten-digit number is divisible by 11, or
/// the first nine digits leave remainder 10 and the check digit is 0.
/// Nine-digit numbers predate the checksum and never pass.
fn birth_number_checksum_ok(value: &str) -> bool {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 10 {
        return false;
    }
    let Ok(number) = digits.parse::<u64>() else {
        return false;
    };
    number % 11 == 0 || ((number / 10) % 11 == 10 && number % 10 == 0)
}

fn iban_checksum_ok(value: &str) -> bool {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if !compact.is_ascii() || compact.len() < 15 || compact.len() > 34 {
        return false;
    }

    let rearranged = format!("{}{}", &compact[4..], &compact[..4]);
    let mut remainder: u32 = 0;
    for c in rearranged.chars() {
        let value = match c.to_digit(36) {
            Some(v) => v,
            None => return false,
        };
        remainder = if value < 10 {
            (remainder * 10 + value) % 97
        } else {
            (remainder * 100 + value) % 97
        };
    }
    remainder == 1
}

fn luhn_ok(value: &str) -> bool {
    let digits: Vec<u32> = value.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// The set of recognizers an analyzer runs.
#[derive(Default)]
pub struct RecognizerRegistry {
    recognizers: Vec<Box<dyn EntityRecognizer>>,
}

impl RecognizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_recognizer(&mut self, recognizer: Box<dyn EntityRecognizer>) {
        debug!("Registered recognizer '{}'", recognizer.name());
        self.recognizers.push(recognizer);
    }

    pub fn load_predefined_recognizers(&mut self, language: &str) {
        for recognizer in predefined_recognizers(language) {
            self.add_recognizer(Box::new(recognizer));
        }
    }

    /// Adds one pattern recognizer per configured entity type.
    ///
    /// Every pattern is compiled before any is registered, so an invalid
    /// pattern leaves the registry unchanged.
    pub fn add_pattern_recognizers(
        &mut self,
        patterns: &HashMap<String, String>,
        language: &str,
    ) -> Result<(), regex::Error> {
        let mut names: Vec<&String> = patterns.keys().collect();
        names.sort();
        let compiled = names
            .into_iter()
            .map(|name| PatternRecognizer::new(name, &[patterns[name].as_str()], language))
            .collect::<Result<Vec<_>, _>>()?;

        for recognizer in compiled {
            self.add_recognizer(Box::new(recognizer));
        }
        Ok(())
    }

    pub fn get_recognizers(&self, language: &str) -> Vec<&dyn EntityRecognizer> {
        self.recognizers
            .iter()
            .filter(|r| r.supported_language() == language)
            .map(|r| r.as_ref())
            .collect()
    }

    pub fn supported_entities(&self, language: &str) -> Vec<String> {
        let entities: BTreeSet<String> = self
            .get_recognizers(language)
            .into_iter()
            .flat_map(|r| r.supported_entities().iter().cloned())
            .collect();
        entities.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.recognizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recognizers.is_empty()
    }
}
