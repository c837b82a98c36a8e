//! Type definitions for parsed OpenAPI contracts

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::resolver::SchemaResolver;

/// HTTP methods supported by OpenAPI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Trace,
}

impl HttpMethod {
    /// Every method, in the order path items are scanned
    pub const ALL: [HttpMethod; 8] = [
        HttpMethod::Get,
        HttpMethod::Put,
        HttpMethod::Post,
        HttpMethod::Delete,
        HttpMethod::Options,
        HttpMethod::Head,
        HttpMethod::Patch,
        HttpMethod::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
        }
    }

    /// Key used for this method inside a path item
    pub fn key(&self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
            HttpMethod::Patch => "patch",
            HttpMethod::Delete => "delete",
            HttpMethod::Head => "head",
            HttpMethod::Options => "options",
            HttpMethod::Trace => "trace",
        }
    }

    /// Whether requests with this method conventionally carry a body
    pub fn has_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.key().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown HTTP method: {}", s))
    }
}

/// Parameter location in HTTP request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParameterLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterLocation::Path => "path",
            ParameterLocation::Query => "query",
            ParameterLocation::Header => "header",
            ParameterLocation::Cookie => "cookie",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(ParameterLocation::Path),
            "query" => Some(ParameterLocation::Query),
            "header" => Some(ParameterLocation::Header),
            "cookie" => Some(ParameterLocation::Cookie),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parameter for an API operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationParameter {
    /// Parameter name
    pub name: String,
    /// Where the parameter is located
    pub location: ParameterLocation,
    /// Whether the parameter is required
    pub required: bool,
    /// Parameter description
    pub description: Option<String>,
    /// Schema for the parameter, as declared (references kept)
    pub schema: Option<Value>,
    /// Example value
    pub example: Option<Value>,
    /// Whether the parameter is deprecated
    pub deprecated: bool,
    /// Serialization style (form, simple, spaceDelimited, ...)
    pub style: Option<String>,
    /// Whether array values explode into repeated parameters
    pub explode: Option<bool>,
}

/// Request body schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestBody {
    /// Whether the body is required
    pub required: bool,
    /// Preferred content type (JSON when declared)
    pub content_type: String,
    /// Every declared content type, in document order
    pub content_types: Vec<String>,
    /// Schema for the preferred content type
    pub schema: Option<Value>,
    /// Description
    pub description: Option<String>,
}

impl RequestBody {
    /// Whether the body declares the given media type (parameters ignored)
    pub fn accepts(&self, content_type: &str) -> bool {
        media_type_declared(&self.content_types, content_type)
    }
}

/// Response schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSchema {
    /// HTTP status code, range (`2XX`) or `default`
    pub status_code: String,
    /// Preferred content type
    pub content_type: Option<String>,
    /// Every declared content type, in document order
    pub content_types: Vec<String>,
    /// Schema for the preferred content type
    pub schema: Option<Value>,
    /// Description
    pub description: Option<String>,
}

impl ResponseSchema {
    /// Whether this response describes a 2xx outcome
    pub fn is_success(&self) -> bool {
        self.status_code.starts_with('2')
    }

    /// Whether the response declares the given media type
    pub fn declares(&self, content_type: &str) -> bool {
        media_type_declared(&self.content_types, content_type)
    }
}

fn media_type_declared(declared: &[String], content_type: &str) -> bool {
    let wanted = essence(content_type);
    declared.iter().any(|ct| {
        let ct = essence(ct);
        ct == wanted
            || ct == "*/*"
            || (ct.ends_with("/*") && wanted.starts_with(ct.trim_end_matches('*')))
    })
}

/// Media type without parameters, lowercased
/// (`application/json; charset=utf-8` -> `application/json`)
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// A single API operation extracted from the document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiOperation {
    /// Unique operation ID (from the document or generated)
    pub operation_id: String,
    /// snake_case name used for generated client functions
    pub function_name: String,
    /// HTTP method
    pub method: HttpMethod,
    /// URL path template (e.g., "/document/{docId}/")
    pub path: String,
    /// Short summary
    pub summary: Option<String>,
    /// Full description
    pub description: Option<String>,
    /// Tags for categorization
    pub tags: Vec<String>,
    /// Whether the operation is deprecated
    pub deprecated: bool,
    /// Parameters (path, query, header, cookie)
    pub parameters: Vec<OperationParameter>,
    /// Request body schema
    pub request_body: Option<RequestBody>,
    /// Responses in document order
    pub responses: Vec<ResponseSchema>,
    /// Effective security requirements (empty means anonymous)
    pub security: Vec<SecurityRequirement>,
}

impl ApiOperation {
    /// Responses describing a 2xx outcome
    pub fn success_responses(&self) -> impl Iterator<Item = &ResponseSchema> {
        self.responses.iter().filter(|r| r.is_success())
    }

    /// Find the response declared for a concrete status code.
    ///
    /// Exact codes win over ranges (`4XX`), which win over `default`.
    pub fn response_for(&self, status: u16) -> Option<&ResponseSchema> {
        let exact = status.to_string();
        let range = format!("{}XX", status / 100);

        self.responses
            .iter()
            .find(|r| r.status_code == exact)
            .or_else(|| {
                self.responses
                    .iter()
                    .find(|r| r.status_code.eq_ignore_ascii_case(&range))
            })
            .or_else(|| self.responses.iter().find(|r| r.status_code == "default"))
    }

    /// Parameters declared at a given location
    pub fn parameters_in(
        &self,
        location: ParameterLocation,
    ) -> impl Iterator<Item = &OperationParameter> {
        self.parameters.iter().filter(move |p| p.location == location)
    }
}

/// Security requirement for an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityRequirement {
    /// Name of the security scheme
    pub scheme_name: String,
    /// Required scopes (for OAuth2)
    pub scopes: Vec<String>,
}

/// Typed view of an OpenAPI document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Declared `openapi` version string
    pub openapi_version: String,
    /// API title
    pub title: String,
    /// API description
    pub description: Option<String>,
    /// API version
    pub version: String,
    /// Server URLs
    pub servers: Vec<ServerInfo>,
    /// Declared tags
    pub tags: Vec<TagInfo>,
    /// All extracted operations
    pub operations: Vec<ApiOperation>,
    /// Component schemas keyed by name
    pub schemas: IndexMap<String, Value>,
    /// Security schemes defined in the document
    pub security_schemes: IndexMap<String, SecurityScheme>,
    /// Global security requirements
    pub global_security: Vec<SecurityRequirement>,
}

/// Server information from the document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server URL
    pub url: String,
    /// Server description
    pub description: Option<String>,
}

/// A declared tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagInfo {
    pub name: String,
    pub description: Option<String>,
}

/// Security scheme definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SecurityScheme {
    /// API key authentication
    ApiKey {
        name: String,
        #[serde(rename = "in")]
        location: ApiKeyLocation,
    },
    /// HTTP authentication (bearer, basic)
    Http {
        scheme: String,
        bearer_format: Option<String>,
    },
    /// OAuth2 authentication
    OAuth2 { flows: OAuth2Flows },
    /// OpenID Connect
    OpenIdConnect { openid_connect_url: String },
}

/// API key location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    Header,
    Query,
    Cookie,
}

/// OAuth2 flows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuth2Flows {
    pub authorization_code: Option<OAuth2Flow>,
    pub implicit: Option<OAuth2Flow>,
    pub password: Option<OAuth2Flow>,
    pub client_credentials: Option<OAuth2Flow>,
}

/// OAuth2 flow details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2Flow {
    pub authorization_url: Option<String>,
    pub token_url: Option<String>,
    pub refresh_url: Option<String>,
    pub scopes: IndexMap<String, String>,
}

/// A loaded OpenAPI document: the source tree plus its typed view.
///
/// The source keeps key order, so converters and linters can report and
/// emit in document order.
#[derive(Debug, Clone)]
pub struct ContractDocument {
    /// The document as parsed
    pub source: Value,
    /// Typed view derived from `source`
    pub spec: ContractSpec,
}

impl ContractDocument {
    /// Resolver over this document's local references
    pub fn resolver(&self) -> SchemaResolver<'_> {
        SchemaResolver::new(&self.source)
    }

    /// Look up an operation by its operation ID
    pub fn operation(&self, operation_id: &str) -> Option<&ApiOperation> {
        self.spec
            .operations
            .iter()
            .find(|op| op.operation_id == operation_id)
    }

    /// Look up an operation by method and path template
    pub fn operation_at(&self, method: HttpMethod, path: &str) -> Option<&ApiOperation> {
        self.spec
            .operations
            .iter()
            .find(|op| op.method == method && op.path == path)
    }

    /// First declared server URL, if any
    pub fn default_server(&self) -> Option<&str> {
        self.spec.servers.first().map(|s| s.url.as_str())
    }
}

// --- Raw OpenAPI 3.x structures for parsing ---

/// Raw OpenAPI document structure
#[derive(Debug, Clone, Deserialize)]
pub struct RawOpenApiSpec {
    pub openapi: Option<String>,
    pub info: Option<RawInfo>,
    #[serde(default)]
    pub servers: Vec<RawServer>,
    #[serde(default)]
    pub tags: Vec<RawTag>,
    #[serde(default)]
    pub paths: IndexMap<String, RawPathItem>,
    #[serde(default)]
    pub components: Option<RawComponents>,
    #[serde(default)]
    pub security: Vec<IndexMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawInfo {
    pub title: String,
    pub description: Option<String>,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawServer {
    pub url: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTag {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPathItem {
    pub get: Option<RawOperation>,
    pub post: Option<RawOperation>,
    pub put: Option<RawOperation>,
    pub patch: Option<RawOperation>,
    pub delete: Option<RawOperation>,
    pub head: Option<RawOperation>,
    pub options: Option<RawOperation>,
    pub trace: Option<RawOperation>,
    #[serde(default)]
    pub parameters: Vec<RawParameter>,
}

impl RawPathItem {
    pub fn operation(&self, method: HttpMethod) -> Option<&RawOperation> {
        match method {
            HttpMethod::Get => self.get.as_ref(),
            HttpMethod::Post => self.post.as_ref(),
            HttpMethod::Put => self.put.as_ref(),
            HttpMethod::Patch => self.patch.as_ref(),
            HttpMethod::Delete => self.delete.as_ref(),
            HttpMethod::Head => self.head.as_ref(),
            HttpMethod::Options => self.options.as_ref(),
            HttpMethod::Trace => self.trace.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOperation {
    pub operation_id: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub parameters: Vec<RawParameter>,
    pub request_body: Option<RawRequestBody>,
    #[serde(default)]
    pub responses: IndexMap<String, RawResponse>,
    #[serde(default)]
    pub security: Option<Vec<IndexMap<String, Vec<String>>>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawParameter {
    /// Parameter name (optional when $ref is used)
    #[serde(default)]
    pub name: String,
    /// Parameter location (optional when $ref is used)
    #[serde(rename = "in", default)]
    pub location: String,
    #[serde(default)]
    pub required: bool,
    pub description: Option<String>,
    pub schema: Option<Value>,
    pub example: Option<Value>,
    #[serde(default)]
    pub deprecated: bool,
    pub style: Option<String>,
    pub explode: Option<bool>,
    /// Reference to a parameter in components/parameters
    #[serde(rename = "$ref")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRequestBody {
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub content: IndexMap<String, RawMediaType>,
    /// Reference to a request body in components/requestBodies
    #[serde(rename = "$ref")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMediaType {
    pub schema: Option<Value>,
    pub example: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawResponse {
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<IndexMap<String, RawMediaType>>,
    /// Reference to a response in components/responses
    #[serde(rename = "$ref")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawComponents {
    #[serde(default)]
    pub security_schemes: IndexMap<String, RawSecurityScheme>,
    #[serde(default)]
    pub schemas: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSecurityScheme {
    #[serde(rename = "type")]
    pub scheme_type: String,
    pub name: Option<String>,
    #[serde(rename = "in")]
    pub location: Option<String>,
    pub scheme: Option<String>,
    pub bearer_format: Option<String>,
    pub flows: Option<RawOAuth2Flows>,
    pub openid_connect_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOAuth2Flows {
    pub authorization_code: Option<RawOAuth2Flow>,
    pub implicit: Option<RawOAuth2Flow>,
    pub password: Option<RawOAuth2Flow>,
    pub client_credentials: Option<RawOAuth2Flow>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOAuth2Flow {
    pub authorization_url: Option<String>,
    pub token_url: Option<String>,
    pub refresh_url: Option<String>,
    #[serde(default)]
    pub scopes: IndexMap<String, String>,
}
