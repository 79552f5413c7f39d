#![allow(dead_code)]

use czech_pii_anonymizer_core::{PiiError, Result, TokenClassifier, TokenLogits};
use std::collections::{BTreeMap, HashMap};

/// Whitespace/punctuation tokenizer with a fixed word -> label dictionary.
/// Optionally labels every capitalized word it does not know.
pub struct DictionaryClassifier {
    words: HashMap<String, usize>,
    capitalized: Option<usize>,
    id2label: BTreeMap<usize, String>,
}

impl DictionaryClassifier {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        let mut id2label = BTreeMap::new();
        id2label.insert(0, "O".to_string());
        let mut words = HashMap::new();

        for (word, label) in entries {
            let id = match id2label.iter().find(|(_, l)| l.as_str() == *label) {
                Some((id, _)) => *id,
                None => {
                    let id = id2label.len();
                    id2label.insert(id, label.to_string());
                    id
                }
            };
            words.insert(word.to_string(), id);
        }

        Self {
            words,
            capitalized: None,
            id2label,
        }
    }

    pub fn with_capitalized_as(mut self, label: &str) -> Self {
        let id = self.id2label.len();
        self.id2label.insert(id, label.to_string());
        self.capitalized = Some(id);
        self
    }

    fn class_of(&self, token: &str) -> usize {
        if let Some(id) = self.words.get(token) {
            return *id;
        }
        match (self.capitalized, token.chars().next()) {
            (Some(id), Some(first)) if first.is_uppercase() => id,
            _ => 0,
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        let mut tokens = vec!["[CLS]".to_string()];
        let mut word = String::new();
        for c in text.chars() {
            if c.is_alphanumeric() {
                word.push(c);
                continue;
            }
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            if !c.is_whitespace() {
                tokens.push(c.to_string());
            }
        }
        if !word.is_empty() {
            tokens.push(word);
        }
        tokens.push("[SEP]".to_string());
        tokens
    }
}

impl TokenClassifier for DictionaryClassifier {
    fn classify(&self, text: &str) -> Result<TokenLogits> {
        if text.contains("\u{0}") {
            return Err(PiiError::Inference {
                reason: "NUL in input".to_string(),
            });
        }

        let tokens = Self::tokenize(text);
        let logits = tokens
            .iter()
            .map(|token| {
                let mut row = vec![0.0f32; self.id2label.len()];
                row[self.class_of(token)] = 1.0;
                row
            })
            .collect();

        Ok(TokenLogits { tokens, logits })
    }

    fn id2label(&self) -> &BTreeMap<usize, String> {
        &self.id2label
    }
}
