//! # openapi-contract
//!
//! OpenAPI 3.x contract layer for the e-signature API.
//! Loads API descriptions, resolves references, extracts operations, lints
//! the document, validates captured traffic against it and converts it to
//! Swagger 2.0.

mod types;
mod parser;
mod resolver;
mod operations;
mod auth;
mod lint;
mod validator;
mod swagger;
mod error;

pub use types::*;
pub use parser::OpenApiParser;
pub use resolver::{ReferenceSite, SchemaResolver};
pub use operations::OperationExtractor;
pub use auth::{AuthScheme, CredentialPlacement};
pub use lint::{ContractLinter, Finding, LintReport, LintRule, LintSettings, Severity};
pub use validator::{
    coerce_parameter, ContractValidator, Direction, RequestCandidate, ResponseCandidate,
    SchemaValidator, ValidationReport, Violation,
};
pub use swagger::{ConnectorMetadata, ConversionOptions, SwaggerConverter};
pub use error::{ContractError, ContractResult};
