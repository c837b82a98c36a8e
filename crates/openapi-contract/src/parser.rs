//! OpenAPI document loader

use std::path::Path;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ContractError, ContractResult};
use crate::operations::OperationExtractor;
use crate::resolver::SchemaResolver;
use crate::types::*;

/// OpenAPI 3.x loader
pub struct OpenApiParser;

impl OpenApiParser {
    /// Parse an OpenAPI document from a string (auto-detects JSON/YAML)
    pub fn parse(content: &str) -> ContractResult<ContractDocument> {
        if content.trim_start().starts_with('{') {
            Self::parse_json(content)
        } else {
            Self::parse_yaml(content)
        }
    }

    /// Parse an OpenAPI document from JSON
    pub fn parse_json(content: &str) -> ContractResult<ContractDocument> {
        let content = Self::sanitize_large_numbers(content);
        let source: Value = serde_json::from_str(&content)?;
        Self::from_value(source)
    }

    /// Parse an OpenAPI document from YAML
    pub fn parse_yaml(content: &str) -> ContractResult<ContractDocument> {
        let content = Self::sanitize_large_numbers(content);
        let source: Value = serde_yaml::from_str(&content)?;
        Self::ensure_mapping(&source)?;

        // Typed view straight from YAML so plain scalars (`version: 1.0`) keep their text
        let raw: RawOpenApiSpec = serde_yaml::from_str(&content)
            .map_err(|e| ContractError::InvalidFormat(e.to_string()))?;
        Self::assemble(source, raw)
    }

    /// Load an OpenAPI document from a file; the extension picks the format
    pub fn load_file(path: impl AsRef<Path>) -> ContractResult<ContractDocument> {
        let path = path.as_ref();
        info!("Loading OpenAPI document from {}", path.display());

        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::parse_yaml(&content),
            Some("json") => Self::parse_json(&content),
            _ => Self::parse(&content),
        }
    }

    /// Load from a local path or an http(s) URL
    pub async fn load(location: &str) -> ContractResult<ContractDocument> {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::fetch_and_parse(location).await
        } else {
            Self::load_file(location)
        }
    }

    /// Replace integers too large for JSON numbers in numeric bounds.
    ///
    /// The exact value of such a bound never matters for validation, so
    /// it is clamped to the i32 range.
    fn sanitize_large_numbers(content: &str) -> String {
        let re_large = match Regex::new(
            r"(?m)^(\s*(?:minimum|maximum|exclusiveMinimum|exclusiveMaximum):\s*)(-?\d{16,})",
        ) {
            Ok(re) => re,
            Err(_) => return content.to_string(),
        };

        re_large
            .replace_all(content, |caps: &regex::Captures| {
                let prefix = &caps[1];
                if caps[2].starts_with('-') {
                    format!("{}-2147483648", prefix)
                } else {
                    format!("{}2147483647", prefix)
                }
            })
            .into_owned()
    }

    /// Fetch and parse an OpenAPI document from a URL
    pub async fn fetch_and_parse(url: &str) -> ContractResult<ContractDocument> {
        info!("Fetching OpenAPI document from: {}", url);

        url::Url::parse(url).map_err(|e| ContractError::InvalidUrl(format!("{}: {}", url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ContractError::HttpError(e.to_string()))?;

        let response = client
            .get(url)
            .header("Accept", "application/json, application/yaml, text/yaml")
            .send()
            .await
            .map_err(|e| ContractError::FetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ContractError::FetchError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_default();

        let content = response
            .text()
            .await
            .map_err(|e| ContractError::FetchError(e.to_string()))?;

        if content_type.contains("yaml") || url.ends_with(".yaml") || url.ends_with(".yml") {
            Self::parse_yaml(&content)
        } else {
            Self::parse(&content)
        }
    }

    /// Build the typed view of an already parsed document
    pub fn from_value(source: Value) -> ContractResult<ContractDocument> {
        Self::ensure_mapping(&source)?;

        let raw: RawOpenApiSpec = serde_json::from_value(source.clone())
            .map_err(|e| ContractError::InvalidFormat(e.to_string()))?;
        Self::assemble(source, raw)
    }

    fn ensure_mapping(source: &Value) -> ContractResult<()> {
        if source.is_object() {
            Ok(())
        } else {
            Err(ContractError::InvalidFormat(
                "document root must be a mapping".to_string(),
            ))
        }
    }

    fn assemble(source: Value, raw: RawOpenApiSpec) -> ContractResult<ContractDocument> {
        let spec = Self::convert_spec(raw, &source)?;
        Ok(ContractDocument { source, spec })
    }

    /// Convert a raw OpenAPI document to the typed view
    fn convert_spec(raw: RawOpenApiSpec, source: &Value) -> ContractResult<ContractSpec> {
        let openapi_version = raw
            .openapi
            .clone()
            .ok_or_else(|| ContractError::MissingField("openapi".to_string()))?;
        if !openapi_version.starts_with("3.") {
            return Err(ContractError::UnsupportedVersion(openapi_version));
        }

        let info = raw
            .info
            .clone()
            .ok_or_else(|| ContractError::MissingField("info".to_string()))?;

        debug!("Parsing OpenAPI {} document: {}", openapi_version, info.title);

        let resolver = SchemaResolver::new(source);
        let operations = OperationExtractor::extract(&raw, &resolver)?;

        debug!("Extracted {} operations", operations.len());

        let (security_schemes, schemas) = match &raw.components {
            Some(c) => (
                Self::convert_security_schemes(&c.security_schemes),
                c.schemas.clone(),
            ),
            None => (IndexMap::new(), IndexMap::new()),
        };

        let global_security = raw
            .security
            .iter()
            .flat_map(|req| {
                req.iter().map(|(name, scopes)| SecurityRequirement {
                    scheme_name: name.clone(),
                    scopes: scopes.clone(),
                })
            })
            .collect();

        let servers = raw
            .servers
            .iter()
            .map(|s| ServerInfo {
                url: s.url.clone(),
                description: s.description.clone(),
            })
            .collect();

        let tags = raw
            .tags
            .iter()
            .map(|t| TagInfo {
                name: t.name.clone(),
                description: t.description.clone(),
            })
            .collect();

        Ok(ContractSpec {
            openapi_version,
            title: info.title,
            description: info.description,
            version: info.version,
            servers,
            tags,
            operations,
            schemas,
            security_schemes,
            global_security,
        })
    }

    /// Convert raw security schemes; unknown types are skipped
    fn convert_security_schemes(
        raw: &IndexMap<String, RawSecurityScheme>,
    ) -> IndexMap<String, SecurityScheme> {
        raw.iter()
            .filter_map(|(name, scheme)| {
                Self::convert_security_scheme(scheme).map(|s| (name.clone(), s))
            })
            .collect()
    }

    fn convert_security_scheme(raw: &RawSecurityScheme) -> Option<SecurityScheme> {
        match raw.scheme_type.as_str() {
            "apiKey" => Some(SecurityScheme::ApiKey {
                name: raw.name.clone().unwrap_or_default(),
                location: match raw.location.as_deref() {
                    Some("query") => ApiKeyLocation::Query,
                    Some("cookie") => ApiKeyLocation::Cookie,
                    _ => ApiKeyLocation::Header,
                },
            }),
            "http" => Some(SecurityScheme::Http {
                scheme: raw.scheme.clone().unwrap_or_else(|| "bearer".to_string()),
                bearer_format: raw.bearer_format.clone(),
            }),
            "oauth2" => {
                let flows = raw
                    .flows
                    .as_ref()
                    .map(Self::convert_oauth2_flows)
                    .unwrap_or_default();
                Some(SecurityScheme::OAuth2 { flows })
            }
            "openIdConnect" => Some(SecurityScheme::OpenIdConnect {
                openid_connect_url: raw.openid_connect_url.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }

    fn convert_oauth2_flows(raw: &RawOAuth2Flows) -> OAuth2Flows {
        OAuth2Flows {
            authorization_code: raw.authorization_code.as_ref().map(Self::convert_oauth2_flow),
            implicit: raw.implicit.as_ref().map(Self::convert_oauth2_flow),
            password: raw.password.as_ref().map(Self::convert_oauth2_flow),
            client_credentials: raw.client_credentials.as_ref().map(Self::convert_oauth2_flow),
        }
    }

    fn convert_oauth2_flow(raw: &RawOAuth2Flow) -> OAuth2Flow {
        OAuth2Flow {
            authorization_url: raw.authorization_url.clone(),
            token_url: raw.token_url.clone(),
            refresh_url: raw.refresh_url.clone(),
            scopes: raw.scopes.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_SPEC: &str = r#"
openapi: "3.0.3"
info:
  title: Signing API
  version: "1.0.0"
servers:
  - url: https://api.example.com/api/v1
tags:
  - name: document
paths:
  /document/:
    get:
      operationId: listDocuments
      summary: List documents
      parameters:
        - $ref: '#/components/parameters/Limit'
      responses:
        '200':
          description: A page of documents
          content:
            application/json:
              schema:
                type: array
                items:
                  $ref: '#/components/schemas/Document'
    post:
      operationId: createDocument
      summary: Send a document for signing
      requestBody:
        $ref: '#/components/requestBodies/NewDocument'
      responses:
        '201':
          description: Document created
  /document/{docId}/:
    parameters:
      - name: docId
        in: path
        schema:
          type: string
          format: uuid
    get:
      operationId: getDocument
      responses:
        '200':
          $ref: '#/components/responses/DocumentResponse'
        '404':
          description: Not found
    delete:
      security: []
      responses:
        '204':
          description: Deleted
components:
  securitySchemes:
    apiKeyAuth:
      type: apiKey
      in: header
      name: Authorization
  parameters:
    Limit:
      name: limit
      in: query
      schema:
        type: integer
        minimum: 1
  requestBodies:
    NewDocument:
      required: true
      content:
        application/json:
          schema:
            $ref: '#/components/schemas/NewDocument'
  responses:
    DocumentResponse:
      description: A document
      content:
        application/json:
          schema:
            $ref: '#/components/schemas/Document'
  schemas:
    Document:
      type: object
      required: [uuid, name]
      properties:
        uuid:
          type: string
          format: uuid
          readOnly: true
        name:
          type: string
    NewDocument:
      type: object
      required: [name]
      properties:
        name:
          type: string
security:
  - apiKeyAuth: []
"#;

    #[test]
    fn test_parse_yaml() {
        let doc = OpenApiParser::parse_yaml(SAMPLE_SPEC).unwrap();

        assert_eq!(doc.spec.title, "Signing API");
        assert_eq!(doc.spec.version, "1.0.0");
        assert_eq!(doc.spec.openapi_version, "3.0.3");
        assert_eq!(doc.spec.operations.len(), 4);
        assert_eq!(doc.spec.servers[0].url, "https://api.example.com/api/v1");
        assert_eq!(doc.spec.schemas.len(), 2);
    }

    #[test]
    fn test_parse_yaml_plain_scalar_versions() {
        let doc = OpenApiParser::parse_yaml(
            "openapi: 3.0.3\ninfo: {title: 2024, version: 1.10}\npaths: {}",
        )
        .unwrap();

        assert_eq!(doc.spec.version, "1.10");
        assert_eq!(doc.spec.title, "2024");
        assert!(doc.spec.operations.is_empty());
    }

    #[test]
    fn test_parse_resolves_component_references() {
        let doc = OpenApiParser::parse_yaml(SAMPLE_SPEC).unwrap();

        let list = doc.operation("listDocuments").unwrap();
        assert_eq!(list.parameters.len(), 1);
        assert_eq!(list.parameters[0].name, "limit");

        let create = doc.operation("createDocument").unwrap();
        let body = create.request_body.as_ref().unwrap();
        assert!(body.required);
        assert_eq!(body.content_type, "application/json");

        let get = doc.operation("getDocument").unwrap();
        assert_eq!(get.parameters[0].name, "docId");
        assert!(get.parameters[0].required);
        let ok = get.response_for(200).unwrap();
        assert_eq!(ok.content_type.as_deref(), Some("application/json"));
        assert_eq!(ok.description.as_deref(), Some("A document"));
    }

    #[test]
    fn test_parse_generates_missing_operation_ids() {
        let doc = OpenApiParser::parse_yaml(SAMPLE_SPEC).unwrap();

        let delete = doc
            .operation_at(HttpMethod::Delete, "/document/{docId}/")
            .unwrap();
        assert_eq!(delete.operation_id, "delete_document_docId");
        assert_eq!(delete.function_name, "delete_document_doc_id");
        assert!(delete.security.is_empty());
    }

    #[test]
    fn test_parse_extracts_security() {
        let doc = OpenApiParser::parse_yaml(SAMPLE_SPEC).unwrap();

        assert!(matches!(
            doc.spec.security_schemes.get("apiKeyAuth"),
            Some(SecurityScheme::ApiKey { location: ApiKeyLocation::Header, .. })
        ));
        assert_eq!(doc.spec.global_security.len(), 1);
        assert_eq!(doc.spec.global_security[0].scheme_name, "apiKeyAuth");
        assert_eq!(doc.operation("getDocument").unwrap().security.len(), 1);
    }

    #[test]
    fn test_parse_json_auto_detect() {
        let json = r#"{"openapi": "3.1.0", "info": {"title": "T", "version": "2"}, "paths": {}}"#;
        let doc = OpenApiParser::parse(json).unwrap();
        assert_eq!(doc.spec.version, "2");
        assert!(doc.spec.operations.is_empty());
    }

    #[test]
    fn test_rejects_swagger_2() {
        let result = OpenApiParser::parse_yaml(
            "swagger: '2.0'\nopenapi: '2.0'\ninfo: {title: T, version: '1'}\n",
        );
        assert!(matches!(result, Err(ContractError::UnsupportedVersion(v)) if v == "2.0"));
    }

    #[test]
    fn test_rejects_missing_info() {
        let result = OpenApiParser::parse_yaml("openapi: 3.0.0\npaths: {}\n");
        assert!(matches!(result, Err(ContractError::MissingField(f)) if f == "info"));
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        let result = OpenApiParser::parse_yaml("openapi: [3.0.0\n");
        assert!(matches!(result, Err(ContractError::YamlError(_))));
    }

    #[test]
    fn test_sanitize_large_numbers() {
        let yaml_with_large_nums = r#"
openapi: "3.0.0"
info:
  title: Test API
  version: "1.0.0"
paths: {}
components:
  schemas:
    Counter:
      type: integer
      minimum: -9223372036854776000
      maximum: 9223372036854776000
"#;

        let doc = OpenApiParser::parse_yaml(yaml_with_large_nums).unwrap();
        assert_eq!(doc.spec.schemas["Counter"]["maximum"], 2147483647);
        assert_eq!(doc.spec.schemas["Counter"]["minimum"], -2147483648);
    }

    #[test]
    fn test_load_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contract.yaml");
        std::fs::write(&path, SAMPLE_SPEC).unwrap();

        let doc = OpenApiParser::load_file(&path).unwrap();
        assert_eq!(doc.spec.title, "Signing API");

        let missing = OpenApiParser::load_file(dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(ContractError::IoError(_))));
    }

    #[tokio::test]
    async fn test_fetch_rejects_invalid_url() {
        let result = OpenApiParser::fetch_and_parse("not a url").await;
        assert!(matches!(result, Err(ContractError::InvalidUrl(_))));
    }
}
