use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ArchiverError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("reference file not known: {0}")]
    UnknownReference(String),

    #[error("copy of {source_url} to {destination} failed: {reason}")]
    #[diagnostic(help("no source files were deleted; the next trigger retries the execution"))]
    CopyFailed {
        source_url: String,
        destination: String,
        reason: String,
    },

    #[error("malformed lineage graph: {0}")]
    MalformedLineageGraph(String),

    #[error("no automated clean-up available for pipeline: {0}")]
    UnsupportedPipeline(String),

    #[error("no study specified or study is not known: {0}")]
    UnknownStudy(String),

    #[error("missing workflow input: {0}")]
    MissingInput(String),

    #[error("missing workflow output: {0}")]
    MissingOutput(String),

    #[error("invalid blob url: {0}")]
    InvalidBlobUrl(String),

    #[error("invalid manifest name: {0}")]
    InvalidManifestName(String),

    #[error("invalid lineage id: {0}")]
    InvalidId(String),

    #[error("object store request failed: {0}")]
    StoreHttp(String),

    #[error("object store returned status {status} for {url}: {message}")]
    StoreStatus {
        status: u16,
        url: String,
        message: String,
    },

    #[error("metadata service request failed: {0}")]
    MetadataHttp(String),

    #[error("metadata service returned status {status}: {message}")]
    MetadataStatus { status: u16, message: String },

    #[error("missing config file pipeline-archiver.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to parse JSON document {name}: {message}")]
    Json { name: String, message: String },
}
