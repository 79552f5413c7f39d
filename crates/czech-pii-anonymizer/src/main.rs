//! Czech PII anonymizer command-line interface

use anyhow::Result;
use clap::Parser;
use czech_pii_anonymizer_core::{
    calculate_anonymization_accuracy, export_results, AnalyzerCache, AnonymizerEngine, Config, ExportFormat,
    OperatorKind, PiiError, TransformerEngineFactory,
};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, help = "Plain-text (.txt) file to anonymize")]
    pub input: Option<PathBuf>,

    #[arg(long, conflicts_with = "input", help = "Text to anonymize (read from stdin when neither --input nor --text is given)")]
    pub text: Option<String>,

    #[arg(long, help = "Model identifier: Hugging Face repository or local directory")]
    pub model: Option<String>,

    #[arg(long, help = "Comma-separated entity types to detect (default: all supported)")]
    pub entities: Option<String>,

    #[arg(long, help = "Minimum confidence score in [0, 1]")]
    pub threshold: Option<f64>,

    #[arg(long, help = "Language code, or 'auto'")]
    pub language: Option<String>,

    #[arg(long, help = "Anonymization operator (replace, mask, delete)")]
    pub operator: Option<String>,

    #[arg(long, help = "Character used by the mask operator")]
    pub mask_char: Option<char>,

    #[arg(long, help = "Number of characters the mask operator replaces")]
    pub chars_to_mask: Option<usize>,

    #[arg(long, help = "Mask from the end of each entity instead of the start")]
    pub from_end: bool,

    #[arg(long, action = clap::ArgAction::Append, help = "Per-entity operator override (TYPE=OPERATOR)")]
    pub entity_operator: Vec<String>,

    #[arg(long, default_value = "txt", help = "Export format (txt, json, csv)")]
    pub format: String,

    #[arg(long, help = "Write the export here instead of stdout")]
    pub output: Option<PathBuf>,

    #[arg(long, default_value = "info", help = "Log level (error, warn, info, debug, trace)")]
    pub log_level: String,

    #[arg(long, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Print the entity types the model supports and exit")]
    pub list_entities: bool,
}

impl Args {
    pub fn parse_entity_operators(&self) -> Result<HashMap<String, String>> {
        self.entity_operator
            .iter()
            .try_fold(HashMap::new(), |mut acc, pair| -> Result<HashMap<String, String>> {
                match pair.split_once('=') {
                    Some((entity, operator)) if !entity.trim().is_empty() => {
                        operator.parse::<OperatorKind>()?;
                        acc.insert(entity.trim().to_string(), operator.trim().to_string());
                        Ok(acc)
                    }
                    _ => Err(anyhow::anyhow!(
                        "Invalid entity operator format: '{}'. Expected TYPE=OPERATOR",
                        pair
                    )),
                }
            })
    }

    pub fn parse_entities(&self) -> Vec<String> {
        self.entities
            .as_deref()
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn apply_overrides(&self, config: &mut Config) -> Result<()> {
        if let Some(model) = &self.model {
            config.detection.model = model.clone();
        }
        if let Some(threshold) = self.threshold {
            config.detection.confidence_threshold = threshold;
        }
        if let Some(language) = &self.language {
            config.detection.language = language.clone();
        }
        let entities = self.parse_entities();
        if !entities.is_empty() {
            config.detection.entities = entities;
        }

        if let Some(operator) = &self.operator {
            config.anonymization.operator = operator.clone();
        }
        if let Some(mask_char) = self.mask_char {
            config.anonymization.mask_char = mask_char;
        }
        if let Some(chars_to_mask) = self.chars_to_mask {
            config.anonymization.chars_to_mask = chars_to_mask;
        }
        if self.from_end {
            config.anonymization.from_end = true;
        }
        config
            .anonymization
            .entity_operators
            .extend(self.parse_entity_operators()?);

        Ok(())
    }

    pub fn read_input(&self) -> Result<String> {
        if let Some(text) = &self.text {
            return Ok(text.clone());
        }

        match &self.input {
            Some(path) => read_text_file(path),
            None => {
                debug!("Reading input from stdin");
                let mut buffer = String::new();
                std::io::stdin().read_to_string(&mut buffer)?;
                Ok(buffer)
            }
        }
    }
}

fn read_text_file(path: &Path) -> Result<String> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if extension != "txt" {
        return Err(PiiError::UnsupportedInputFormat(path.display().to_string()).into());
    }

    info!("Reading input from: {}", path.display());
    Ok(std::fs::read_to_string(path)?)
}

fn load_config(args: &Args) -> Result<Config> {
    let config = match args.config.as_ref() {
        Some(config_path) => {
            info!("Loading configuration from: {}", config_path.display());
            Config::from_file(config_path)?
        }
        None => match Config::get_default_config_path() {
            Ok(default_path) if default_path.exists() => {
                info!("Loading configuration from default location: {}", default_path.display());
                Config::from_file(&default_path)?
            }
            Ok(default_path) => {
                info!("Creating default configuration at: {}", default_path.display());
                let mut config = Config::default();
                config.resolve_paths()?;
                config.to_file(&default_path)?;
                config
            }
            Err(_) => {
                info!("Using default configuration (could not determine config directory)");
                let mut config = Config::default();
                config.resolve_paths()?;
                config
            }
        },
    };
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log_level.parse::<tracing::Level>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", args.log_level);
        tracing::Level::INFO
    });

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting czech-pii-anonymizer");

    let mut config = load_config(&args)?;
    args.apply_overrides(&mut config)?;
    config.validate()?;
    info!("Configuration validated successfully");

    let model_id = config.detection.model.clone();
    let cache = AnalyzerCache::new(TransformerEngineFactory::new(config.clone()));

    if args.list_entities {
        for entity in cache.supported_entities(&model_id)? {
            println!("{}", entity);
        }
        return Ok(());
    }

    let format: ExportFormat = args.format.parse()?;
    let text = args.read_input()?;

    let mut spans = cache.analyze(
        &model_id,
        &text,
        Some(config.detection.entities.as_slice()),
        config.detection.confidence_threshold,
        &config.detection.language,
    )?;
    spans.sort_by_key(|s| s.start);

    let anonymizer = AnonymizerEngine::from_config(&config.anonymization)?;
    let result = anonymizer.anonymize(&text, &spans);
    let accuracy = calculate_anonymization_accuracy(&text, &result.text, &spans);
    let exported = export_results(&result.text, &spans, format)?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &exported)?;
            info!("Wrote {} export to {}", format, path.display());
        }
        None => println!("{}", exported),
    }

    info!("Run summary:");
    info!("  Model: {}", model_id);
    info!("  Operator: {}", config.anonymization.operator);
    info!("  Detected entities: {}", spans.len());
    info!("  Input length: {} characters", text.chars().count());
    info!("  Output length: {} characters", result.text.chars().count());
    info!("  Anonymization accuracy: {:.2}", accuracy);

    Ok(())
}
