//! Configuration
//!
//! One explicit value threaded through construction instead of any
//! process-wide factory: the tree flavor, the binary optimization policy,
//! buffer sizing and identifier settings.

use crate::xop::OptimizationPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default block size for chunked buffers
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default domain suffix of generated content IDs
pub const DEFAULT_HOST_SUFFIX: &str = "streamom.invalid";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("Invalid configuration value: {field} = {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Object model family selected for a builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeFlavor {
    /// Generic XML documents
    #[default]
    Plain,
    /// SOAP 1.1/1.2 envelopes; the document element must be an Envelope
    Soap,
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct OmConfig {
    pub flavor: TreeFlavor,
    pub optimization: OptimizationPolicy,
    pub buffer: BufferConfig,
    pub ids: IdConfig,
}

/// Chunked buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    /// Size in bytes of every block allocated by a chunked buffer
    pub block_size: usize,
}

/// Identifier generator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IdConfig {
    /// Text after the `@` of generated content IDs
    pub host_suffix: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            host_suffix: DEFAULT_HOST_SUFFIX.to_string(),
        }
    }
}

impl OmConfig {
    /// Parse a TOML document and validate the result
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: OmConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer.block_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "buffer.block_size".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let suffix = &self.ids.host_suffix;
        if suffix.is_empty() || !suffix.bytes().all(|b| is_atext(b) || b == b'.') {
            return Err(ConfigError::InvalidValue {
                field: "ids.host_suffix".to_string(),
                value: suffix.clone(),
                reason: "must be a non-empty dot-atom".to_string(),
            });
        }

        Ok(())
    }
}

/// RFC 5322 `atext` characters, the alphabet of content IDs
pub fn is_atext(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-/=?^_`{|}~".contains(&b)
}
