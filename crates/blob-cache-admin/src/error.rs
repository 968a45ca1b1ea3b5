//! Error types for the blob cache admin tool

use std::fmt;
use tiered_blob_cache::CacheError;

#[derive(Debug)]
pub enum AdminError {
    Cache(CacheError),
    Json(serde_json::Error),
    Config(String),
}

impl fmt::Display for AdminError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminError::Cache(err) => write!(f, "Cache error: {}", err),
            AdminError::Json(err) => write!(f, "JSON error: {}", err),
            AdminError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for AdminError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AdminError::Cache(err) => Some(err),
            AdminError::Json(err) => Some(err),
            AdminError::Config(_) => None,
        }
    }
}

impl From<CacheError> for AdminError {
    fn from(err: CacheError) -> Self {
        AdminError::Cache(err)
    }
}

impl From<serde_json::Error> for AdminError {
    fn from(err: serde_json::Error) -> Self {
        AdminError::Json(err)
    }
}

impl From<tracing_subscriber::filter::ParseError> for AdminError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        AdminError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AdminError>;
