//! Anonymization engine
//!
//! Rewrites detected spans with one operator per entity type. Spans are
//! conflict-resolved first and the output is built left to right, so a
//! rewrite never moves the offsets of a span that has not been applied yet.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::{AnonymizationConfig, EntitySpan};
use crate::error::{PiiError, Result};

pub const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    Delete,
    Replace,
    Mask,
}

impl FromStr for OperatorKind {
    type Err = PiiError;

    /// Accepts the English names and the Czech labels used by the web form.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "delete" | "remove" | "odstranění" => Ok(Self::Delete),
            "replace" | "nahrazení" => Ok(Self::Replace),
            "mask" | "maskování" => Ok(Self::Mask),
            _ => Err(PiiError::InvalidOperator(s.to_string())),
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Delete => "delete",
            Self::Replace => "replace",
            Self::Mask => "mask",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorSpec {
    Delete,
    /// `None` writes the typed placeholder `<ENTITY_TYPE>`.
    Replace { new_value: Option<String> },
    /// `None` for `chars_to_mask` masks the whole span.
    Mask {
        masking_char: char,
        chars_to_mask: Option<usize>,
        from_end: bool,
    },
}

impl OperatorSpec {
    pub fn kind(&self) -> OperatorKind {
        match self {
            Self::Delete => OperatorKind::Delete,
            Self::Replace { .. } => OperatorKind::Replace,
            Self::Mask { .. } => OperatorKind::Mask,
        }
    }

    pub fn apply(&self, original: &str, entity_type: &str) -> String {
        match self {
            Self::Delete => String::new(),
            Self::Replace { new_value: Some(value) } => value.clone(),
            Self::Replace { new_value: None } => format!("<{}>", entity_type),
            Self::Mask {
                masking_char,
                chars_to_mask,
                from_end,
            } => {
                let len = original.chars().count();
                let masked = chars_to_mask.unwrap_or(len).min(len);
                let mask: String = std::iter::repeat(*masking_char).take(masked).collect();
                if *from_end {
                    let kept: String = original.chars().take(len - masked).collect();
                    kept + &mask
                } else {
                    let kept: String = original.chars().skip(masked).collect();
                    mask + &kept
                }
            }
        }
    }
}

/// Parameters shared by every operator built for one anonymization call.
#[derive(Debug, Clone, PartialEq)]
pub struct AnonymizeOptions {
    pub mask_char: char,
    pub chars_to_mask: Option<usize>,
    pub from_end: bool,
    pub aggregate_redaction: bool,
}

impl Default for AnonymizeOptions {
    fn default() -> Self {
        Self {
            mask_char: '*',
            chars_to_mask: None,
            from_end: false,
            aggregate_redaction: true,
        }
    }
}

impl From<&AnonymizationConfig> for AnonymizeOptions {
    fn from(config: &AnonymizationConfig) -> Self {
        Self {
            mask_char: config.mask_char,
            chars_to_mask: Some(config.chars_to_mask),
            from_end: config.from_end,
            aggregate_redaction: config.aggregate_redaction,
        }
    }
}

impl AnonymizeOptions {
    fn operator_for(&self, kind: OperatorKind) -> OperatorSpec {
        match kind {
            OperatorKind::Delete => OperatorSpec::Delete,
            OperatorKind::Replace => OperatorSpec::Replace {
                new_value: self
                    .aggregate_redaction
                    .then(|| REDACTED_PLACEHOLDER.to_string()),
            },
            OperatorKind::Mask => OperatorSpec::Mask {
                masking_char: self.mask_char,
                chars_to_mask: self.chars_to_mask,
                from_end: self.from_end,
            },
        }
    }
}

/// A DEFAULT operator plus per-entity-type overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorTable {
    default: OperatorSpec,
    overrides: HashMap<String, OperatorSpec>,
}

impl OperatorTable {
    pub fn new(default: OperatorSpec) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn build(
        operator: &str,
        options: &AnonymizeOptions,
        entity_operators: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut table = Self::new(options.operator_for(operator.parse()?));
        for (entity_type, name) in entity_operators {
            table.set(entity_type, options.operator_for(name.parse()?));
        }
        Ok(table)
    }

    pub fn set(&mut self, entity_type: &str, spec: OperatorSpec) {
        self.overrides.insert(entity_type.to_string(), spec);
    }

    pub fn get(&self, entity_type: &str) -> &OperatorSpec {
        self.overrides.get(entity_type).unwrap_or(&self.default)
    }

    pub fn default_operator(&self) -> &OperatorSpec {
        &self.default
    }
}

/// One applied span, in output-text character offsets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorResult {
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub operator: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnonymizerResult {
    pub text: String,
    pub items: Vec<OperatorResult>,
}

/// Sorts spans by start and removes overlaps.
///
/// Out-of-bounds spans are dropped. A span covered by the spans kept so far is
/// dropped too (for identical ranges the higher score is kept), and a span
/// that only partially overlaps is trimmed to start where the previous one
/// ends.
pub fn resolve_conflicts(spans: &[EntitySpan], text_len: usize) -> Vec<EntitySpan> {
    let mut candidates: Vec<EntitySpan> = spans
        .iter()
        .filter(|span| {
            let valid = span.is_within(text_len);
            if !valid {
                debug!(
                    "Ignoring out-of-bounds span {} [{}, {}) for text of length {}",
                    span.entity_type, span.start, span.end, text_len
                );
            }
            valid
        })
        .cloned()
        .collect();

    candidates.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then(b.end.cmp(&a.end))
            .then(b.score.total_cmp(&a.score))
    });

    let mut resolved: Vec<EntitySpan> = Vec::with_capacity(candidates.len());
    for mut span in candidates {
        if let Some(previous) = resolved.last() {
            if span.end <= previous.end {
                continue;
            }
            if span.start < previous.end {
                span.start = previous.end;
            }
        }
        resolved.push(span);
    }

    resolved
}

/// Byte index of every char boundary, including the end of the text.
pub(crate) fn char_boundaries(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect()
}

pub struct AnonymizerEngine {
    operators: OperatorTable,
}

impl AnonymizerEngine {
    pub fn new(operators: OperatorTable) -> Self {
        Self { operators }
    }

    pub fn from_config(config: &AnonymizationConfig) -> Result<Self> {
        let options = AnonymizeOptions::from(config);
        let operators = OperatorTable::build(&config.operator, &options, &config.entity_operators)?;
        Ok(Self::new(operators))
    }

    pub fn operators(&self) -> &OperatorTable {
        &self.operators
    }

    pub fn anonymize(&self, text: &str, spans: &[EntitySpan]) -> AnonymizerResult {
        let boundaries = char_boundaries(text);
        let text_len = boundaries.len() - 1;
        let resolved = resolve_conflicts(spans, text_len);

        let mut output = String::with_capacity(text.len());
        let mut output_len = 0;
        let mut cursor = 0;
        let mut items = Vec::with_capacity(resolved.len());

        for span in &resolved {
            let untouched = &text[boundaries[cursor]..boundaries[span.start]];
            output.push_str(untouched);
            output_len += span.start - cursor;

            let operator = self.operators.get(&span.entity_type);
            let original = &text[boundaries[span.start]..boundaries[span.end]];
            let replacement = operator.apply(original, &span.entity_type);
            let replacement_len = replacement.chars().count();

            items.push(OperatorResult {
                entity_type: span.entity_type.clone(),
                start: output_len,
                end: output_len + replacement_len,
                text: replacement.clone(),
                operator: operator.kind().to_string(),
            });

            output.push_str(&replacement);
            output_len += replacement_len;
            cursor = span.end;
        }
        output.push_str(&text[boundaries[cursor]..]);

        info!(
            "Anonymized {} span(s) ({} after conflict resolution)",
            spans.len(),
            items.len()
        );

        AnonymizerResult { text: output, items }
    }
}

/// One-shot anonymization with the usual defaults for anything not given.
pub fn anonymize_text(
    text: &str,
    operator: &str,
    spans: &[EntitySpan],
    mask_char: Option<char>,
    chars_to_mask: Option<usize>,
    entity_operators: Option<&HashMap<String, String>>,
) -> Result<String> {
    let defaults = AnonymizeOptions::default();
    let options = AnonymizeOptions {
        mask_char: mask_char.unwrap_or(defaults.mask_char),
        chars_to_mask,
        ..defaults
    };
    let empty = HashMap::new();
    let operators = OperatorTable::build(operator, &options, entity_operators.unwrap_or(&empty))?;

    Ok(AnonymizerEngine::new(operators).anonymize(text, spans).text)
}
