use anyhow::Result;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::io::{self, Write};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_MODEL_PATH: &str = "crop_recommender_rf.json";
pub const DEFAULT_LABEL_MAPPING_PATH: &str = "label_mapping.json";
pub const DEFAULT_MODEL_KEY: &str = "model";

#[derive(Deserialize, Default)]
pub struct CroprecConfig {
    pub model_path: Option<String>,
    pub label_mapping_path: Option<String>,
    pub model_key: Option<String>,
    pub verbose: Option<bool>,
}

impl CroprecConfig {
    pub fn try_from(config: &Config) -> Result<Self, ConfigError> {
        Ok(CroprecConfig {
            model_path: config.get("model_path").ok(),
            label_mapping_path: config.get("label_mapping_path").ok(),
            model_key: config.get("model_key").ok(),
            verbose: config.get("verbose").ok(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub model_path: String,
    pub label_mapping_path: String,
    pub model_key: String,
    pub verbose: bool,
}

impl State {
    /// Reads `croprec_config.*` from the working directory, then `CROPREC_*`
    /// environment variables, which win.
    pub fn new() -> Result<Self> {
        let config = Config::builder()
            .add_source(ConfigFile::with_name("croprec_config").required(false))
            .add_source(Environment::with_prefix("CROPREC"))
            .build()?;

        let croprec_config = CroprecConfig::try_from(&config)?;
        Ok(Self::from_config(croprec_config))
    }

    pub fn from_config(config: CroprecConfig) -> Self {
        Self {
            model_path: config
                .model_path
                .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
            label_mapping_path: config
                .label_mapping_path
                .unwrap_or_else(|| DEFAULT_LABEL_MAPPING_PATH.to_string()),
            model_key: config
                .model_key
                .unwrap_or_else(|| DEFAULT_MODEL_KEY.to_string()),
            verbose: config.verbose.unwrap_or(false),
        }
    }

    pub fn write_config<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "model_path={}", self.model_path)?;
        writeln!(out, "label_mapping_path={}", self.label_mapping_path)?;
        writeln!(out, "model_key={}", self.model_key)?;
        writeln!(out, "verbose={}", self.verbose)
    }
}

/// Sends log output to stderr so stdout stays machine-readable.
/// `RUST_LOG` takes precedence over `verbose`.
pub fn init_logging(verbose: bool) {
    let fallback = if verbose { "croprec=debug" } else { "croprec=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    // A subscriber may already be installed (tests, embedding callers).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
