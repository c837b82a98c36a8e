//! # contract-client
//!
//! Runtime client and stub generator for the e-signature API contract.
//! Every request is checked against the OpenAPI document before it is sent
//! and every response after it arrives.

mod client;
mod error;
mod generator;
mod transport;

pub use client::{ApiKey, CallArguments, ContractClient, ContractResponse};
pub use error::{ClientError, ClientResult};
pub use generator::{rust_type, StubGenerator};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
