use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EclipError {
    #[error("invalid ENCODE experiment accession: {0}")]
    InvalidAccession(String),

    #[error("config file not found at {0}")]
    MissingConfig(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("ENCODE request failed: {0}")]
    EncodeHttp(String),

    #[error("ENCODE returned status {status}: {message}")]
    EncodeStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to decompress {path}: {message}")]
    Decompress { path: PathBuf, message: String },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("job submission failed: {0}")]
    Submission(String),

    #[error("failed to read job output {path}: {message}")]
    Aggregation { path: PathBuf, message: String },

    #[error("no job output records found under {0}")]
    NothingToMerge(PathBuf),

    #[error("viewer error: {0}")]
    Viewer(String),
}
