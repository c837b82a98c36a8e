//! Error types for the contract layer

use thiserror::Error;

/// Result type alias for contract operations
pub type ContractResult<T> = std::result::Result<T, ContractError>;

/// Contract error types
#[derive(Error, Debug)]
pub enum ContractError {
    #[error("Failed to fetch OpenAPI document: {0}")]
    FetchError(String),

    #[error("Invalid OpenAPI document format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unsupported OpenAPI version: {0}")]
    UnsupportedVersion(String),

    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),
}
