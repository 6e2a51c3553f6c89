//! Error types shared across Clarion crates.
//!
//! [`ClarionError`] covers values that fail to parse or fall outside their
//! allowed range; [`ConfigError`] covers loading and saving the TOML config.

use thiserror::Error;

/// Invalid value error shared by the domain types.
#[derive(Error, Debug)]
pub enum ClarionError {
    /// A crawl bound or other numeric setting is outside its range
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// Setting name
        field: &'static str,
        /// Rejected value
        value: u32,
        /// Smallest allowed value
        min: u32,
        /// Largest allowed value
        max: u32,
    },

    /// A string does not name any variant of an enum
    #[error("unknown {kind} '{value}'")]
    UnknownVariant {
        /// What was being parsed
        kind: &'static str,
        /// Rejected input
        value: String,
    },

    /// An identifier is not a UUID
    #[error("invalid {kind} id '{value}': {source}")]
    InvalidId {
        /// Identifier kind
        kind: &'static str,
        /// Rejected input
        value: String,
        /// Parse failure
        #[source]
        source: uuid::Error,
    },
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No XDG directories for this user
    #[error("could not determine config directory (XDG base directories not available)")]
    NoConfigDir,

    /// Malformed TOML
    #[error("failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Config could not be written as TOML
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Reading or writing the file failed
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value would make the engine unusable
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Dotted key of the value
        field: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Result alias for domain value errors.
pub type Result<T> = std::result::Result<T, ClarionError>;

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
