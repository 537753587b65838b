//! Error taxonomy for the ingestion pipeline.
//!
//! Fetchers and the publisher return [`IngestError`]. Per-item problems are
//! logged and skipped where they happen; anything that reaches the pipeline
//! boundary fails the whole source run.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// A credential or required setting is missing. Raised before any network call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport failure or non-2xx answer from an external service.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// A feed, XML or HTML document that yields nothing usable.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid AI response after {attempts} attempts: {reason}")]
    InvalidAiResponse { attempts: usize, reason: String },

    #[error("no valid links found in AI response for {0}")]
    NoLinksFound(String),

    #[error("failed to repair JSON: {0}")]
    JsonRepair(String),

    /// A search returned nothing across every step.
    #[error("no results found for query: {0}")]
    NoResults(String),

    #[error("content store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl IngestError {
    /// Short machine-friendly name of the error kind, used in logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Configuration(_) => "configuration",
            IngestError::Fetch(_) => "fetch",
            IngestError::Parse(_) => "parse",
            IngestError::InvalidAiResponse { .. } => "invalid_ai_response",
            IngestError::NoLinksFound(_) => "no_links_found",
            IngestError::JsonRepair(_) => "json_repair",
            IngestError::NoResults(_) => "no_results",
            IngestError::Store(_) => "store",
            IngestError::Io(_) => "io",
            IngestError::Json(_) => "json",
            IngestError::Yaml(_) => "yaml",
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        IngestError::Fetch(err.to_string())
    }
}

impl From<quick_xml::Error> for IngestError {
    fn from(err: quick_xml::Error) -> Self {
        IngestError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
