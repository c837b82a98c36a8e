//! Command-line tooling for the e-signature API contract
//!
//! Loads an OpenAPI document and lints it, lists its operations, converts it
//! to Swagger 2.0, generates Rust stubs, validates captured traffic against
//! it, or calls the live service through a contract-checking client.

pub mod commands;
pub mod settings;

pub use commands::{run, Cli, Command, OutputFormat};
pub use settings::{ClientSettings, Settings, SettingsManager};
