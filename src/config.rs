use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

use regex::Regex;
use serde::Deserialize;

use crate::convert::{ErrorPolicy, DEFAULT_BITRATE};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {}: {source}", path.display())]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("invalid bitrate \"{0}\", expected e.g. 256k")]
    InvalidBitrate(String),
}

/// Runtime settings. Every field is optional in the JSON file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub bitrate: String,
    /// MP3 output directory; the download directory when unset.
    pub output_dir: Option<PathBuf>,
    /// Containers picked up by the conversion scan when the download step
    /// produced nothing to go by.
    pub source_extensions: Vec<String>,
    pub error_policy: ErrorPolicy,
    /// Retries for yt-dlp invocations and transient HTTP errors.
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ytdlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            bitrate: DEFAULT_BITRATE.to_string(),
            output_dir: None,
            source_extensions: vec!["webm".to_string()],
            error_policy: ErrorPolicy::Continue,
            max_retries: 3,
        }
    }
}

fn bitrate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[1-9][0-9]*[kK]?$").expect("valid regex"))
}

pub fn validate_bitrate(bitrate: &str) -> Result<(), ConfigError> {
    if bitrate_re().is_match(bitrate) {
        Ok(())
    } else {
        Err(ConfigError::InvalidBitrate(bitrate.to_string()))
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_bitrate(&self.bitrate)
    }
}
