//! Subcommands of `esign-contract`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use contract_client::{CallArguments, ContractClient, StubGenerator};
use openapi_contract::{
    ApiOperation, AuthScheme, ContractDocument, ContractLinter, ContractValidator, OpenApiParser,
    ParameterLocation, RequestCandidate, ResponseCandidate, SwaggerConverter,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::settings::SettingsManager;

/// Lint, validate, convert and call the e-signature API contract
#[derive(Parser, Debug)]
#[command(name = "esign-contract")]
#[command(version)]
#[command(about = "Tooling for the e-signature API OpenAPI contract")]
pub struct Cli {
    /// Settings file (default: settings.json in the platform config directory)
    #[arg(long, global = true, env = "ESIGN_CONTRACT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check the document's structural properties
    Lint {
        /// Path or http(s) URL of the OpenAPI document
        spec: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Fail on warnings too
        #[arg(long)]
        strict: bool,
    },

    /// List operations
    Operations {
        spec: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Convert to Swagger 2.0 YAML
    Convert {
        spec: String,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Leave out x-ms-connector-metadata
        #[arg(long)]
        no_connector_metadata: bool,
    },

    /// Generate Rust client stubs
    Generate {
        spec: String,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Name of the generated API struct
        #[arg(long, default_value = "EsignApi")]
        api_name: String,
    },

    /// Validate a captured request or response
    Validate {
        spec: String,
        /// Operation ID
        #[arg(long)]
        operation: String,
        /// Validate a request
        #[arg(long, conflicts_with = "response", required_unless_present = "response")]
        request: bool,
        /// Validate a response with this status code
        #[arg(long)]
        response: Option<u16>,
        /// Content-Type of the body (default: application/json)
        #[arg(long)]
        content_type: Option<String>,
        /// JSON body file
        #[arg(long)]
        body: Option<PathBuf>,
        /// Parameter as name=value (repeatable)
        #[arg(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Call an operation on the live service
    Call {
        spec: String,
        /// Operation ID
        #[arg(long)]
        operation: String,
        /// Parameter as name=value (repeatable); JSON values are kept typed
        #[arg(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
        /// JSON body file
        #[arg(long)]
        body: Option<PathBuf>,
        /// Override the server URL
        #[arg(long)]
        base_url: Option<String>,
        /// Log contract violations instead of failing
        #[arg(long)]
        lenient: bool,
        /// Write the response body here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// API key, sent as declared by the security scheme
        #[arg(long, env = "ESIGN_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Parse `name=value`
pub fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{}'", raw)),
    }
}

/// Run a command; `Ok(false)` means the check failed
pub async fn run(cli: Cli) -> Result<bool> {
    let settings = SettingsManager::discover(cli.config.as_deref())?;
    let settings = settings.get();

    match cli.command {
        Command::Lint { spec, format, strict } => {
            let doc = load(&spec).await?;
            let report = ContractLinter::with_settings(&doc, settings.lint.clone()).lint();

            match format {
                OutputFormat::Text => println!("{}", report),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }

            let failed = report.has_errors() || (strict && report.warnings().next().is_some());
            Ok(!failed)
        }

        Command::Operations { spec, format } => {
            let doc = load(&spec).await?;
            print_operations(&doc, format)?;
            Ok(true)
        }

        Command::Convert {
            spec,
            output,
            no_connector_metadata,
        } => {
            let doc = load(&spec).await?;
            let mut options = settings.conversion.clone();
            if no_connector_metadata {
                options.connector_metadata = None;
            }

            let yaml = SwaggerConverter::with_options(&doc, options).to_yaml()?;
            write_output(output.as_deref(), yaml.as_bytes())?;
            Ok(true)
        }

        Command::Generate {
            spec,
            output,
            api_name,
        } => {
            let doc = load(&spec).await?;
            let code = StubGenerator::new(api_name).generate(&doc);
            write_output(output.as_deref(), code.as_bytes())?;
            Ok(true)
        }

        Command::Validate {
            spec,
            operation,
            request: _,
            response,
            content_type,
            body,
            params,
            format,
        } => {
            let doc = load(&spec).await?;
            let op = doc
                .operation(&operation)
                .with_context(|| format!("Unknown operation {}", operation))?;
            let validator = ContractValidator::new(&doc);
            let body = body.as_deref().map(read_json).transpose()?;
            let content_type = content_type
                .or_else(|| body.as_ref().map(|_| "application/json".to_string()));

            let report = match response {
                Some(status) => validator.validate_response(
                    op,
                    &ResponseCandidate {
                        status,
                        content_type,
                        body,
                    },
                ),
                None => {
                    let mut candidate = RequestCandidate::new();
                    for (name, value) in params {
                        let param = op
                            .parameters
                            .iter()
                            .find(|p| p.name == name)
                            .with_context(|| format!("{} has no parameter {}", operation, name))?;
                        match param.location {
                            ParameterLocation::Path => candidate.path_params.insert(name, value),
                            ParameterLocation::Query => candidate.query.insert(name, value),
                            ParameterLocation::Header => candidate.headers.insert(name, value),
                            ParameterLocation::Cookie => candidate.cookies.insert(name, value),
                        };
                    }
                    candidate.content_type = content_type;
                    candidate.body = body;
                    validator.validate_request(op, &candidate)
                }
            };

            match format {
                OutputFormat::Text => println!("{}", report),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
            Ok(report.is_valid())
        }

        Command::Call {
            spec,
            operation,
            params,
            body,
            base_url,
            lenient,
            output,
            api_key,
        } => {
            let doc = load(&spec).await?;
            let op = doc
                .operation(&operation)
                .with_context(|| format!("Unknown operation {}", operation))?;
            let needs_key = AuthScheme::for_operation(&doc.spec, op).requires_credential();

            let mut args = call_arguments(op, params);
            if let Some(path) = &body {
                args = args.body(read_json(path)?);
            }

            let mut client = ContractClient::new(doc)?
                .with_timeout(Duration::from_secs(settings.client.timeout_secs))?
                .strict(settings.client.strict && !lenient);
            if let Some(url) = base_url.as_deref().or(settings.client.base_url.as_deref()) {
                client = client.with_base_url(url)?;
            }

            let api_key = match api_key {
                Some(key) => Some(key),
                None if needs_key => Some(rpassword::prompt_password("API key: ")?),
                None => None,
            };
            if let Some(key) = api_key {
                client = client.with_api_key(key);
            }

            let response = client.call(&operation, args).await?;
            info!("{} answered {}", operation, response.status);
            for violation in &response.violations {
                warn!("Contract violation: {}", violation);
            }

            match (&output, &response.body) {
                (Some(path), _) => write_output(Some(path), &response.bytes)?,
                (None, Some(body)) => println!("{}", serde_json::to_string_pretty(body)?),
                (None, None) if !response.bytes.is_empty() => {
                    eprintln!(
                        "{} byte(s) of {}; use --output to save them",
                        response.bytes.len(),
                        response.content_type.as_deref().unwrap_or("unknown content")
                    );
                }
                (None, None) => {}
            }

            Ok(response.is_success() && response.conforms())
        }
    }
}

async fn load(spec: &str) -> Result<ContractDocument> {
    OpenApiParser::load(spec)
        .await
        .with_context(|| format!("Failed to load {}", spec))
}

fn print_operations(doc: &ContractDocument, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for op in &doc.spec.operations {
                let flag = if op.deprecated { " (deprecated)" } else { "" };
                println!("{:<7} {:<40} {}{}", op.method.as_str(), op.path, op.operation_id, flag);
            }
        }
        OutputFormat::Json => {
            let ops: Vec<Value> = doc
                .spec
                .operations
                .iter()
                .map(|op| {
                    json!({
                        "operationId": op.operation_id,
                        "method": op.method,
                        "path": op.path,
                        "summary": op.summary,
                        "deprecated": op.deprecated,
                        "authenticated": AuthScheme::for_operation(&doc.spec, op)
                            .requires_credential(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&ops)?);
        }
    }
    Ok(())
}

/// Declared parameters pass through as the raw string, typed later from
/// their schema; other arguments end up in the JSON body and keep JSON types
fn call_arguments(op: &ApiOperation, params: Vec<(String, String)>) -> CallArguments {
    params
        .into_iter()
        .fold(CallArguments::new(), |args, (name, value)| {
            if op.parameters.iter().any(|p| p.name == name) {
                args.param(name, value)
            } else {
                let typed = typed_value(&value);
                args.param(name, typed)
            }
        })
}

/// JSON literals stay typed, anything else is a string
fn typed_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn read_json(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn write_output(path: Option<&Path>, contents: &[u8]) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, contents)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => {
            use std::io::Write;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(contents)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONTRACT: &str = include_str!("../../../contract/esign-api-v1.yaml");

    fn workspace() -> (TempDir, String, String) {
        let dir = TempDir::new().unwrap();
        let spec = dir.path().join("esign-api-v1.yaml");
        std::fs::write(&spec, CONTRACT).unwrap();
        let config = dir.path().join("settings.json");
        (
            dir,
            spec.to_string_lossy().into_owned(),
            config.to_string_lossy().into_owned(),
        )
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("docId=abc=def").unwrap(),
            ("docId".to_string(), "abc=def".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_typed_value() {
        assert_eq!(typed_value("30"), json!(30));
        assert_eq!(typed_value("true"), json!(true));
        assert_eq!(typed_value("hr-team"), json!("hr-team"));
    }

    #[test]
    fn test_declared_parameters_keep_their_text() {
        let doc = OpenApiParser::parse_yaml(CONTRACT).unwrap();
        let op = doc.operation("getGroup").unwrap();
        let args = call_arguments(
            op,
            vec![
                ("groupId".to_string(), "1e3".to_string()),
                ("name".to_string(), "1.50".to_string()),
            ],
        );
        assert_eq!(args.params["groupId"], json!("1e3"));
        assert_eq!(args.params["name"], json!(1.5));

        let op = doc.operation("listDocuments").unwrap();
        let args = call_arguments(op, vec![("limit".to_string(), "1.50".to_string())]);
        assert_eq!(args.params["limit"], json!("1.50"));
    }

    #[test]
    fn test_validate_needs_a_direction() {
        let result = Cli::try_parse_from([
            "esign-contract",
            "validate",
            "spec.yaml",
            "--operation",
            "getDocument",
        ]);
        assert!(result.is_err());

        let result = Cli::try_parse_from([
            "esign-contract",
            "validate",
            "spec.yaml",
            "--operation",
            "getDocument",
            "--request",
            "--response",
            "200",
        ]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_lint_bundled_contract() {
        let (_dir, spec, config) = workspace();
        let cli =
            Cli::try_parse_from(["esign-contract", "--config", &config, "lint", &spec, "--strict"])
                .unwrap();

        assert!(run(cli).await.unwrap());
    }

    #[tokio::test]
    async fn test_convert_to_file() {
        let (dir, spec, config) = workspace();
        let out = dir.path().join("swagger.yaml");
        let cli = Cli::try_parse_from([
            "esign-contract",
            "--config",
            &config,
            "convert",
            &spec,
            "-o",
            &out.to_string_lossy(),
            "--no-connector-metadata",
        ])
        .unwrap();

        assert!(run(cli).await.unwrap());
        let yaml = std::fs::read_to_string(&out).unwrap();
        assert!(yaml.contains("basePath: /api/v1"));
        assert!(!yaml.contains("x-ms-connector-metadata"));
    }

    #[tokio::test]
    async fn test_validate_captured_response() {
        let (dir, spec, config) = workspace();
        let body = dir.path().join("group.json");
        std::fs::write(&body, r#"{"slug": "hr", "name": 42}"#).unwrap();

        let cli = Cli::try_parse_from([
            "esign-contract",
            "--config",
            &config,
            "validate",
            &spec,
            "--operation",
            "getGroup",
            "--response",
            "200",
            "--body",
            &body.to_string_lossy(),
        ])
        .unwrap();

        assert!(!run(cli).await.unwrap());
    }

    #[tokio::test]
    async fn test_validate_request_parameters() {
        let (_dir, spec, config) = workspace();
        let cli = Cli::try_parse_from([
            "esign-contract",
            "--config",
            &config,
            "validate",
            &spec,
            "--operation",
            "listDocuments",
            "--request",
            "--param",
            "limit=20",
            "--param",
            "status=30",
        ])
        .unwrap();
        assert!(run(cli).await.unwrap());

        let cli = Cli::try_parse_from([
            "esign-contract",
            "--config",
            &config,
            "validate",
            &spec,
            "--operation",
            "listDocuments",
            "--request",
            "--param",
            "bogus=1",
        ])
        .unwrap();
        assert!(run(cli).await.is_err());
    }
}
