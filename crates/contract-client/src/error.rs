//! Error types for contract-client

use openapi_contract::{ContractError, ValidationReport};
use thiserror::Error;

/// Result type alias for client operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Missing path parameter: {0}")]
    MissingPathParameter(String),

    #[error("Invalid call arguments: {0}")]
    InvalidArguments(String),

    #[error("No API key configured for {0}")]
    MissingCredential(String),

    #[error("Request does not match the contract: {0}")]
    RequestViolations(ValidationReport),

    #[error("Response does not match the contract: {0}")]
    ResponseViolations(ValidationReport),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
