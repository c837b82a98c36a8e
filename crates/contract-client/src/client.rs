//! Runtime client that checks every exchange against the contract

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use openapi_contract::{
    essence, ApiOperation, AuthScheme, ContractDocument, ContractValidator, CredentialPlacement,
    ParameterLocation, RequestCandidate, ResponseCandidate, ValidationReport, Violation,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ClientError, ClientResult};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

/// API key - automatically zeroed when dropped
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ApiKey {
    value: String,
}

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Get the key (use carefully)
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey").field("value", &"[REDACTED]").finish()
    }
}

/// Arguments of one call.
///
/// Parameters are given by name; their location comes from the operation.
/// Names the operation does not declare become the JSON body when the
/// operation takes one and no explicit body is set.
#[derive(Debug, Clone, Default)]
pub struct CallArguments {
    pub params: IndexMap<String, Value>,
    pub body: Option<Value>,
}

impl CallArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Parameters from a serializable struct; `None` fields are skipped
    pub fn from_params<T: Serialize>(params: &T) -> ClientResult<Self> {
        match serde_json::to_value(params)? {
            Value::Object(fields) => Ok(Self {
                params: fields.into_iter().filter(|(_, v)| !v.is_null()).collect(),
                body: None,
            }),
            Value::Null => Ok(Self::default()),
            other => Err(ClientError::InvalidArguments(format!(
                "parameters must serialize to an object, got {}",
                other
            ))),
        }
    }

    pub fn with_body<T: Serialize>(mut self, body: &T) -> ClientResult<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }
}

/// A response together with its contract check
#[derive(Debug, Clone)]
pub struct ContractResponse {
    pub status: u16,
    pub content_type: Option<String>,
    /// Parsed JSON body, if the response carried one
    pub body: Option<Value>,
    /// Raw body bytes
    pub bytes: Vec<u8>,
    /// Where the response departs from the contract
    pub violations: Vec<Violation>,
}

impl ContractResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn conforms(&self) -> bool {
        self.violations.is_empty()
    }

    /// Deserialize the JSON body
    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        Ok(serde_json::from_value(self.body.clone().unwrap_or(Value::Null))?)
    }
}

/// Calls operations of a contract over HTTP.
///
/// Strict clients refuse to send requests that violate the contract and
/// fail on non-conforming responses; lenient ones log and carry on.
pub struct ContractClient {
    document: Arc<ContractDocument>,
    base_url: Option<Url>,
    api_key: Option<ApiKey>,
    transport: Arc<dyn HttpTransport>,
    strict: bool,
}

impl ContractClient {
    /// Create a client using the document's first server and a 30 s timeout
    pub fn new(document: ContractDocument) -> ClientResult<Self> {
        let base_url = match document.default_server() {
            Some(server) => Some(Self::parse_base_url(server)?),
            None => None,
        };

        Ok(Self {
            document: Arc::new(document),
            base_url,
            api_key: None,
            transport: Arc::new(ReqwestTransport::new(Duration::from_secs(30))?),
            strict: true,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> ClientResult<Self> {
        self.base_url = Some(Self::parse_base_url(base_url)?);
        Ok(self)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(ApiKey::new(api_key));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> ClientResult<Self> {
        self.transport = Arc::new(ReqwestTransport::new(timeout)?);
        Ok(self)
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn document(&self) -> &ContractDocument {
        &self.document
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    fn parse_base_url(url: &str) -> ClientResult<Url> {
        let parsed =
            Url::parse(url).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", url, e)))?;
        if parsed.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(format!("{} cannot be a base URL", url)));
        }
        Ok(parsed)
    }

    /// Call an operation by ID
    pub async fn call(
        &self,
        operation_id: &str,
        args: CallArguments,
    ) -> ClientResult<ContractResponse> {
        let operation = self
            .document
            .operation(operation_id)
            .ok_or_else(|| ClientError::OperationNotFound(operation_id.to_string()))?;

        let validator = ContractValidator::new(&self.document);
        let candidate = Self::request_candidate(operation, args);

        let report = validator.validate_request(operation, &candidate);
        if !report.is_valid() {
            if self.strict {
                return Err(ClientError::RequestViolations(report));
            }
            warn!("Sending non-conforming request: {}", report);
        }

        let request = self.build_request(operation, &candidate)?;
        info!(
            "Calling {} ({} {})",
            operation.operation_id,
            operation.method,
            request.url.path()
        );

        let response = self.transport.send(request).await?;
        self.check_response(operation, &validator, response)
    }

    /// Sort arguments into parameter locations and the body
    fn request_candidate(operation: &ApiOperation, args: CallArguments) -> RequestCandidate {
        let mut candidate = RequestCandidate::new();
        let mut leftover = serde_json::Map::new();

        for (name, value) in args.params {
            let Some(param) = operation.parameters.iter().find(|p| p.name == name) else {
                leftover.insert(name, value);
                continue;
            };
            if let Value::Array(items) = &value {
                candidate
                    .lists
                    .insert(name.clone(), items.iter().map(parameter_string).collect());
            }
            let raw = parameter_string(&value);
            match param.location {
                ParameterLocation::Path => candidate.path_params.insert(name, raw),
                ParameterLocation::Query => candidate.query.insert(name, raw),
                ParameterLocation::Header => candidate.headers.insert(name, raw),
                ParameterLocation::Cookie => candidate.cookies.insert(name, raw),
            };
        }

        candidate.body = match (args.body, &operation.request_body) {
            (None, Some(_)) if !leftover.is_empty() => Some(Value::Object(leftover)),
            (body, _) => {
                if !leftover.is_empty() {
                    warn!(
                        "Ignoring arguments not declared by {}: {:?}",
                        operation.operation_id,
                        leftover.keys().collect::<Vec<_>>()
                    );
                }
                body
            }
        };
        if candidate.body.is_some() {
            candidate.content_type = Some(
                operation
                    .request_body
                    .as_ref()
                    .map(|b| b.content_type.clone())
                    .unwrap_or_else(|| "application/json".to_string()),
            );
        }

        candidate
    }

    fn build_request(
        &self,
        operation: &ApiOperation,
        candidate: &RequestCandidate,
    ) -> ClientResult<HttpRequest> {
        let base = self.base_url.as_ref().ok_or_else(|| {
            ClientError::InvalidUrl("the document declares no server; set a base URL".to_string())
        })?;

        let mut url = base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ClientError::InvalidUrl(format!("{} cannot be a base URL", base)))?;
            segments.pop_if_empty();
            for segment in operation.path.trim_start_matches('/').split('/') {
                segments.push(&substitute(segment, &candidate.path_params)?);
            }
        }

        let mut query: Vec<(String, String)> = Vec::new();
        for param in operation.parameters_in(ParameterLocation::Query) {
            let Some(raw) = candidate.query.get(&param.name) else {
                continue;
            };
            // Form style explodes arrays into repeated keys unless told otherwise
            match candidate.lists.get(&param.name) {
                Some(items) if param.explode.unwrap_or(true) => {
                    for item in items {
                        query.push((param.name.clone(), item.clone()));
                    }
                }
                _ => query.push((param.name.clone(), raw.clone())),
            }
        }

        let mut headers: Vec<(String, String)> = operation
            .parameters_in(ParameterLocation::Header)
            .filter_map(|p| {
                candidate
                    .headers
                    .get(&p.name)
                    .map(|v| (p.name.clone(), v.clone()))
            })
            .collect();
        let mut cookies: Vec<String> = candidate
            .cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();

        let auth = AuthScheme::for_operation(&self.document.spec, operation);
        if auth.requires_credential() {
            match &self.api_key {
                Some(key) => match auth.place(key.expose()) {
                    Some(CredentialPlacement::Header { name, value }) => {
                        headers.push((name, value))
                    }
                    Some(CredentialPlacement::Query { name, value }) => query.push((name, value)),
                    Some(CredentialPlacement::Cookie { name, value }) => {
                        cookies.push(format!("{}={}", name, value))
                    }
                    None => {}
                },
                None if self.strict => {
                    return Err(ClientError::MissingCredential(operation.operation_id.clone()))
                }
                None => warn!(
                    "No API key configured; calling {} anonymously",
                    operation.operation_id
                ),
            }
        }

        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        if !cookies.is_empty() {
            headers.push(("Cookie".to_string(), cookies.join("; ")));
        }

        let mut accept: Vec<&str> = operation
            .success_responses()
            .flat_map(|r| r.content_types.iter().map(String::as_str))
            .collect();
        accept.dedup();
        if !accept.is_empty() {
            headers.push(("Accept".to_string(), accept.join(", ")));
        }

        Ok(HttpRequest {
            method: operation.method,
            url,
            headers,
            body: candidate.body.clone(),
        })
    }

    fn check_response(
        &self,
        operation: &ApiOperation,
        validator: &ContractValidator<'_>,
        response: HttpResponse,
    ) -> ClientResult<ContractResponse> {
        let looks_like_json = match response.content_type.as_deref() {
            Some(ct) => essence(ct).contains("json"),
            None => !response.body.is_empty(),
        };

        let mut violations = Vec::new();
        let body = if looks_like_json && !response.body.is_empty() {
            match serde_json::from_slice::<Value>(&response.body) {
                Ok(value) => Some(value),
                Err(e) => {
                    violations.push(Violation::new("body", "json", format!("invalid JSON: {}", e)));
                    None
                }
            }
        } else {
            None
        };

        let candidate = ResponseCandidate {
            status: response.status,
            content_type: response.content_type.clone(),
            body: body.clone(),
        };
        violations.extend(validator.validate_response(operation, &candidate).violations);

        debug!(
            "{} answered {} with {} violation(s)",
            operation.operation_id,
            response.status,
            violations.len()
        );

        if !violations.is_empty() {
            let report = ValidationReport {
                operation_id: operation.operation_id.clone(),
                violations,
            };
            if self.strict {
                return Err(ClientError::ResponseViolations(report));
            }
            warn!("Response departs from the contract: {}", report);
            violations = report.violations;
        }

        Ok(ContractResponse {
            status: response.status,
            content_type: response.content_type,
            body,
            bytes: response.body,
            violations,
        })
    }
}

/// String form of an argument; arrays are comma-separated
fn parameter_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(parameter_string)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

/// Fill `{name}` placeholders of one path segment
fn substitute(segment: &str, values: &IndexMap<String, String>) -> ClientResult<String> {
    let mut out = String::new();
    let mut rest = segment;

    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let name = &rest[start + 1..start + len];
        let value = values
            .get(name)
            .ok_or_else(|| ClientError::MissingPathParameter(name.to_string()))?;
        out.push_str(&rest[..start]);
        out.push_str(value);
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use openapi_contract::{HttpMethod, OpenApiParser};
    use serde_json::json;
    use tokio::sync::Mutex;

    pub(crate) const CONTRACT: &str = include_str!("../../../contract/esign-api-v1.yaml");
    const DOC_ID: &str = "0d6c2f8e-5e0a-4b7b-9a3c-1f7f0e1d2c3b";

    struct MockTransport {
        response: HttpResponse,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl MockTransport {
        fn new(status: u16, content_type: Option<&str>, body: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                response: HttpResponse {
                    status,
                    content_type: content_type.map(|s| s.to_string()),
                    body: body.to_vec(),
                },
                requests: Mutex::new(Vec::new()),
            })
        }

        fn json(status: u16, body: Value) -> Arc<Self> {
            Self::new(status, Some("application/json"), body.to_string().as_bytes())
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, request: HttpRequest) -> ClientResult<HttpResponse> {
            self.requests.lock().await.push(request);
            Ok(self.response.clone())
        }
    }

    fn client(transport: Arc<MockTransport>) -> ContractClient {
        let doc = OpenApiParser::parse_yaml(CONTRACT).unwrap();
        ContractClient::new(doc)
            .unwrap()
            .with_api_key("ApiKey jane:secret")
            .with_transport(transport)
    }

    fn document_body() -> Value {
        json!({
            "uuid": DOC_ID,
            "name": "Employment contract",
            "group": "/api/v1/group/hr/",
            "status": 10,
            "created": "2024-05-01T10:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_call_get_document() {
        let transport = MockTransport::json(200, document_body());
        let client = client(transport.clone());

        let response = client
            .call("getDocument", CallArguments::new().param("docId", DOC_ID))
            .await
            .unwrap();

        assert!(response.is_success());
        assert!(response.conforms());
        assert_eq!(response.body.as_ref().unwrap()["name"], "Employment contract");

        let requests = transport.requests.lock().await;
        let request = &requests[0];
        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(
            request.url.as_str(),
            format!("https://eu-api.example.com/api/v1/document/{}/", DOC_ID)
        );
        assert_eq!(request.header("authorization"), Some("ApiKey jane:secret"));
        assert_eq!(request.header("accept"), Some("application/json"));
        assert!(request.body.is_none());
    }

    #[tokio::test]
    async fn test_query_parameters_in_declared_order() {
        let transport = MockTransport::json(
            200,
            json!({"meta": {"limit": 10, "offset": 0, "total_count": 0}, "objects": []}),
        );
        let client = client(transport.clone());

        let args = CallArguments::new().param("limit", 10).param("status", 30);
        let response = client.call("listDocuments", args).await.unwrap();
        assert!(response.conforms());

        let requests = transport.requests.lock().await;
        assert_eq!(requests[0].url.query(), Some("status=30&limit=10"));
    }

    #[tokio::test]
    async fn test_path_values_are_percent_encoded() {
        let transport = MockTransport::json(200, json!({"slug": "hr team", "name": "HR"}));
        let client = client(transport.clone()).strict(false);

        // The slug breaks the declared pattern; a lenient client still sends it
        let response = client
            .call("getGroup", CallArguments::new().param("groupId", "hr team"))
            .await
            .unwrap();
        assert!(response.conforms());

        let requests = transport.requests.lock().await;
        assert_eq!(requests[0].url.path(), "/api/v1/group/hr%20team/");
    }

    #[tokio::test]
    async fn test_strict_client_does_not_send_invalid_request() {
        let transport = MockTransport::new(201, None, b"");
        let client = client(transport.clone());

        let result = client
            .call("createDocument", CallArguments::new().body(json!({"name": "x"})))
            .await;

        match result {
            Err(ClientError::RequestViolations(report)) => {
                assert_eq!(report.operation_id, "createDocument");
                assert!(report.violations.iter().all(|v| v.keyword == "required"));
            }
            other => panic!("expected request violations, got {:?}", other.map(|r| r.status)),
        }
        assert!(transport.requests.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_undeclared_arguments_become_body() {
        let transport = MockTransport::new(201, None, b"");
        let client = client(transport.clone());

        let response = client
            .call("createGroup", CallArguments::new().param("name", "HR"))
            .await
            .unwrap();
        assert_eq!(response.status, 201);
        assert!(response.conforms());

        let requests = transport.requests.lock().await;
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].body, Some(json!({"name": "HR"})));
    }

    #[tokio::test]
    async fn test_response_drift() {
        let mut drifted = document_body();
        drifted.as_object_mut().unwrap().remove("name");

        let strict = client(MockTransport::json(200, drifted.clone()));
        let result = strict
            .call("getDocument", CallArguments::new().param("docId", DOC_ID))
            .await;
        match result {
            Err(ClientError::ResponseViolations(report)) => {
                assert_eq!(report.violations[0].location, "body");
                assert_eq!(report.violations[0].keyword, "required");
            }
            other => panic!("expected response violations, got {:?}", other.map(|r| r.status)),
        }

        let lenient = client(MockTransport::json(200, drifted)).strict(false);
        let response = lenient
            .call("getDocument", CallArguments::new().param("docId", DOC_ID))
            .await
            .unwrap();
        assert_eq!(response.violations.len(), 1);
    }

    #[tokio::test]
    async fn test_pdf_download() {
        let transport = MockTransport::new(200, Some("application/pdf"), b"%PDF-1.7");
        let client = client(transport.clone());

        let response = client
            .call("downloadPdf", CallArguments::new().param("docId", DOC_ID))
            .await
            .unwrap();

        assert!(response.conforms());
        assert!(response.body.is_none());
        assert_eq!(response.bytes, b"%PDF-1.7");
        assert_eq!(
            transport.requests.lock().await[0].header("accept"),
            Some("application/pdf")
        );
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let doc = OpenApiParser::parse_yaml(CONTRACT).unwrap();
        let transport = MockTransport::json(200, document_body());
        let client = ContractClient::new(doc).unwrap().with_transport(transport.clone());

        let result = client
            .call("getDocument", CallArguments::new().param("docId", DOC_ID))
            .await;
        assert!(matches!(result, Err(ClientError::MissingCredential(id)) if id == "getDocument"));

        let lenient = client.strict(false);
        lenient
            .call("getDocument", CallArguments::new().param("docId", DOC_ID))
            .await
            .unwrap();
        assert!(transport.requests.lock().await[0].header("authorization").is_none());
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let client = client(MockTransport::new(200, None, b""));
        let result = client.call("signEverything", CallArguments::new()).await;
        assert!(matches!(result, Err(ClientError::OperationNotFound(_))));
    }

    #[test]
    fn test_from_params_skips_none() {
        #[derive(Serialize)]
        struct Params {
            limit: Option<i64>,
            group: Option<String>,
        }

        let args = CallArguments::from_params(&Params {
            limit: Some(5),
            group: None,
        })
        .unwrap();
        assert_eq!(args.params.len(), 1);
        assert_eq!(args.params["limit"], json!(5));
    }

    #[test]
    fn test_substitute() {
        let mut values = IndexMap::new();
        values.insert("docId".to_string(), "abc".to_string());

        assert_eq!(substitute("{docId}.pdf", &values).unwrap(), "abc.pdf");
        assert_eq!(substitute("document", &values).unwrap(), "document");
        assert!(matches!(
            substitute("{signerId}", &values),
            Err(ClientError::MissingPathParameter(name)) if name == "signerId"
        ));
    }

    #[test]
    fn test_api_key_debug_is_redacted() {
        let key = ApiKey::new("ApiKey jane:secret");
        assert!(!format!("{:?}", key).contains("secret"));
        assert_eq!(key.expose(), "ApiKey jane:secret");
    }

    const ARRAY_QUERY_CONTRACT: &str = r#"
openapi: 3.0.3
info: {title: Audit, version: "1"}
servers:
  - url: https://audit.example.com/v1
paths:
  /events/:
    get:
      operationId: listEvents
      parameters:
        - name: group
          in: query
          schema:
            type: array
            items: {type: string}
        - name: kind
          in: query
          explode: false
          schema:
            type: array
            items: {type: integer}
      responses:
        '204':
          description: No events
"#;

    async fn array_query(args: CallArguments) -> Option<String> {
        let transport = MockTransport::new(204, None, b"");
        let doc = OpenApiParser::parse_yaml(ARRAY_QUERY_CONTRACT).unwrap();
        let client = ContractClient::new(doc).unwrap().with_transport(transport.clone());

        let response = client.call("listEvents", args).await.unwrap();
        assert!(response.conforms());

        let requests = transport.requests.lock().await;
        requests[0].url.query().map(|q| q.to_string())
    }

    #[tokio::test]
    async fn test_exploded_array_query_repeats_key() {
        let query = array_query(CallArguments::new().param("group", json!(["hr", "legal"]))).await;
        assert_eq!(query.as_deref(), Some("group=hr&group=legal"));
    }

    #[tokio::test]
    async fn test_array_item_with_comma_stays_whole() {
        let args = CallArguments::new().param("group", json!(["hr", "legal,finance"]));
        let query = array_query(args).await;
        assert_eq!(query.as_deref(), Some("group=hr&group=legal%2Cfinance"));
    }

    #[tokio::test]
    async fn test_unexploded_array_query_is_comma_joined() {
        let query = array_query(CallArguments::new().param("kind", json!([10, 20]))).await;
        assert_eq!(query.as_deref(), Some("kind=10%2C20"));
    }

    #[tokio::test]
    async fn test_string_parameter_sent_verbatim() {
        let transport = MockTransport::json(200, json!({"slug": "1e3", "name": "Numbers"}));
        let client = client(transport.clone());

        let response = client
            .call("getGroup", CallArguments::new().param("groupId", "1e3"))
            .await
            .unwrap();
        assert!(response.conforms());

        let requests = transport.requests.lock().await;
        assert_eq!(requests[0].url.path(), "/api/v1/group/1e3/");
    }
}
