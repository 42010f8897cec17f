//! Configuration management for sourceintel
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Entity-resolution configuration
    #[serde(default)]
    pub matching: MatchingConfig,

    /// Signal detection thresholds
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Ingest orchestration settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Entity-resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Minimum score (0.0 - 1.0) a candidate must reach to be matched
    #[serde(default = "default_min_match_score")]
    pub min_match_score: f64,

    /// Geohash length used for the geographic fingerprint
    #[serde(default = "default_geohash_precision")]
    pub geohash_precision: usize,

    /// Weight of an exact geohash agreement
    #[serde(default = "default_geo_weight")]
    pub geo_weight: f64,

    /// Weight of an exact normalized-address agreement
    #[serde(default = "default_address_weight")]
    pub address_weight: f64,

    /// Weight of a shared image perceptual hash
    #[serde(default = "default_media_weight")]
    pub media_weight: f64,
}

/// Signal detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_duplicate_min_confidence")]
    pub duplicate_min_confidence: f64,

    /// Fractional price change that counts as an anomaly (0.25 = 25%)
    #[serde(default = "default_price_change_threshold")]
    pub price_change_threshold: f64,

    #[serde(default = "default_price_lookback_days")]
    pub price_lookback_days: i64,

    #[serde(default = "default_low_trust_floor")]
    pub low_trust_floor: i64,

    #[serde(default = "default_low_trust_max_confidence")]
    pub low_trust_max_confidence: f64,

    /// Sources below this trust score get their signals escalated
    #[serde(default = "default_escalation_trust_floor")]
    pub escalation_trust_floor: i64,
}

/// Ingest orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of listing keys processed concurrently
    #[serde(default = "default_pipeline_workers")]
    pub workers: usize,

    /// De-duplicate signals by (observed listing, type) before insert
    #[serde(default = "default_dedupe_signals")]
    pub dedupe_signals: bool,

    /// SQLite connection pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for sourceintel data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_match_score: default_min_match_score(),
            geohash_precision: default_geohash_precision(),
            geo_weight: default_geo_weight(),
            address_weight: default_address_weight(),
            media_weight: default_media_weight(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            duplicate_min_confidence: default_duplicate_min_confidence(),
            price_change_threshold: default_price_change_threshold(),
            price_lookback_days: default_price_lookback_days(),
            low_trust_floor: default_low_trust_floor(),
            low_trust_max_confidence: default_low_trust_max_confidence(),
            escalation_trust_floor: default_escalation_trust_floor(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_pipeline_workers(),
            dedupe_signals: default_dedupe_signals(),
            max_connections: default_max_connections(),
        }
    }
}

fn unit_interval(value: f64, name: &str) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::Config(format!("{} must be between 0.0 and 1.0", name)));
    }
    Ok(())
}

impl Config {
    /// Get the default base directory (~/.sourceintel, or $SOURCEINTEL_HOME)
    pub fn default_base_dir() -> PathBuf {
        if let Ok(home) = std::env::var("SOURCEINTEL_HOME") {
            return PathBuf::from(home);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sourceintel")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("metadata.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("metadata.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Check if sourceintel is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let m = &self.matching;
        unit_interval(m.min_match_score, "matching.min_match_score")?;

        if m.geohash_precision == 0 || m.geohash_precision > 12 {
            return Err(Error::Config(
                "matching.geohash_precision must be between 1 and 12".to_string(),
            ));
        }

        for (weight, name) in [
            (m.geo_weight, "matching.geo_weight"),
            (m.address_weight, "matching.address_weight"),
            (m.media_weight, "matching.media_weight"),
        ] {
            if weight <= 0.0 {
                return Err(Error::Config(format!("{} must be positive", name)));
            }
        }

        let d = &self.detection;
        unit_interval(d.duplicate_min_confidence, "detection.duplicate_min_confidence")?;
        unit_interval(d.low_trust_max_confidence, "detection.low_trust_max_confidence")?;

        if d.price_change_threshold <= 0.0 {
            return Err(Error::Config(
                "detection.price_change_threshold must be positive".to_string(),
            ));
        }

        if d.price_lookback_days <= 0 {
            return Err(Error::Config(
                "detection.price_lookback_days must be positive".to_string(),
            ));
        }

        if d.escalation_trust_floor > d.low_trust_floor {
            return Err(Error::Config(
                "detection.escalation_trust_floor must be <= detection.low_trust_floor"
                    .to_string(),
            ));
        }

        if self.pipeline.workers == 0 {
            return Err(Error::Config("pipeline.workers must be >= 1".to_string()));
        }

        if self.pipeline.max_connections == 0 {
            return Err(Error::Config(
                "pipeline.max_connections must be >= 1".to_string(),
            ));
        }

        Ok(())
    }
}
