use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarmonizeError {
    #[error("invalid compartment: {0}")]
    InvalidCompartment(String),

    #[error("invalid midpoint/damage tier: {0}")]
    InvalidTier(String),

    #[error("invalid geographical resolution: {0}")]
    InvalidResolution(String),

    #[error("invalid region entry: {0}")]
    InvalidRegion(String),

    #[error("invalid mapping entry: {0}")]
    InvalidMapping(String),

    #[error("missing config file iw-harmonizer.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("missing source snapshot: {0}")]
    MissingSource(PathBuf),

    #[error("failed to read source snapshot: {0}")]
    SourceRead(String),

    #[error("source family `{family}` row {row}: {message}")]
    SourceSchema {
        family: String,
        row: usize,
        message: String,
    },

    #[error("source family `{family}` is incomplete: {message}")]
    IncompleteFamily { family: String, message: String },

    #[error("source family `{family}` lacks reference flow `{flow}`")]
    MissingReferenceFlow { family: String, flow: String },

    #[error("unknown target vocabulary: {0}")]
    UnknownTarget(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("export failed: {0}")]
    Export(String),
}

impl HarmonizeError {
    pub fn schema(family: &str, row: usize, message: impl Into<String>) -> Self {
        HarmonizeError::SourceSchema {
            family: family.to_string(),
            row,
            message: message.into(),
        }
    }
}
