//! Payload validation against the contract
//!
//! [`SchemaValidator`] checks a JSON instance against an OpenAPI 3.0 schema
//! object. [`ContractValidator`] builds on it to check a whole request or
//! response against one operation: parameters, content type, status code
//! and body.

use std::sync::OnceLock;

use indexmap::IndexMap;
use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, JSONSchema, ValidationError};
use serde::Serialize;
use serde_json::{json, Map, Number, Value};
use tracing::debug;

use crate::error::{ContractError, ContractResult};
use crate::operations::OperationExtractor;
use crate::resolver::{reference_of, SchemaResolver};
use crate::types::*;

/// Which side of an exchange is being validated.
///
/// `readOnly` properties only belong in responses and `writeOnly`
/// properties only in requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// A single contract violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Where in the exchange the problem is (`body/signers/0/email`, `query.limit`, ...)
    pub location: String,
    /// Schema keyword or contract rule that failed
    pub keyword: String,
    /// Human-readable explanation
    pub message: String,
}

impl Violation {
    pub fn new(location: impl Into<String>, keyword: &str, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            keyword: keyword.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let location = if self.location.is_empty() { "/" } else { &self.location };
        write!(f, "{} [{}]: {}", location, self.keyword, self.message)
    }
}

/// Validates JSON instances against OpenAPI schema objects.
///
/// Schemas are compiled with `jsonschema` as Draft 4, whose boolean
/// `exclusiveMinimum`/`exclusiveMaximum` match OpenAPI 3.0. The
/// OpenAPI-only keywords are rewritten first: `nullable` becomes a type
/// union, properties excluded in the current [`Direction`] stop being
/// required and reject any value, and numeric exclusive bounds (3.1 style)
/// become their boolean form.
pub struct SchemaValidator<'a> {
    resolver: SchemaResolver<'a>,
    direction: Direction,
    components: OnceLock<Value>,
}

/// Marks the `not` schema that stands in for an excluded property
const EXCLUDED_MARKER: &str = "x-excluded";

impl<'a> SchemaValidator<'a> {
    pub fn new(resolver: SchemaResolver<'a>, direction: Direction) -> Self {
        Self {
            resolver,
            direction,
            components: OnceLock::new(),
        }
    }

    /// Validate `instance`; locations in the result are JSON pointers into the instance
    pub fn validate(&self, schema: &Value, instance: &Value) -> Vec<Violation> {
        let dangling: Vec<Violation> = SchemaResolver::collect_refs(schema)
            .into_iter()
            .filter(|site| self.resolver.lookup(&site.reference).is_none())
            .map(|site| {
                Violation::new("", "$ref", format!("unresolved reference {}", site.reference))
            })
            .collect();
        if !dangling.is_empty() {
            return dangling;
        }

        // $refs are evaluated against this root, so the prepared components
        // sit next to the schema under test
        let root = json!({
            "allOf": [self.prepare(schema)],
            "components": self.components().clone(),
        });

        let compiled = match JSONSchema::options()
            .with_draft(Draft::Draft4)
            .with_format("uuid", is_uuid)
            .compile(&root)
        {
            Ok(compiled) => compiled,
            Err(e) => {
                debug!("Schema does not compile: {}", e);
                let message = format!("schema does not compile: {}", e);
                return vec![Violation::new("", "schema", message)];
            }
        };

        let violations = match compiled.validate(instance) {
            Ok(()) => Vec::new(),
            Err(errors) => errors.map(|e| violation_from(&e)).collect(),
        };
        violations
    }

    pub fn is_valid(&self, schema: &Value, instance: &Value) -> bool {
        self.validate(schema, instance).is_empty()
    }

    /// `components` with every schema prepared for this direction
    fn components(&self) -> &Value {
        self.components.get_or_init(|| {
            let mut components = self
                .resolver
                .document()
                .get("components")
                .cloned()
                .unwrap_or_else(|| json!({}));
            if let Some(Value::Object(schemas)) = components.get_mut("schemas") {
                for schema in schemas.values_mut() {
                    *schema = self.prepare(schema);
                }
            }
            components
        })
    }

    /// Rewrite an OpenAPI schema object into plain Draft 4
    fn prepare(&self, schema: &Value) -> Value {
        let Value::Object(map) = schema else {
            return schema.clone();
        };
        if let Some(reference) = reference_of(schema) {
            // Siblings of $ref are ignored in OpenAPI 3.0
            return json!({ "$ref": reference });
        }

        let mut out = map.clone();

        for key in ["allOf", "anyOf", "oneOf"] {
            if let Some(Value::Array(subs)) = map.get(key) {
                out.insert(key.into(), subs.iter().map(|s| self.prepare(s)).collect());
            }
        }
        for key in ["items", "not", "additionalProperties"] {
            if let Some(sub @ Value::Object(_)) = map.get(key) {
                out.insert(key.into(), self.prepare(sub));
            }
        }

        if let Some(Value::Object(props)) = map.get("properties") {
            let flag = self.excluded_flag();
            let mut prepared = Map::new();
            let mut excluded = Vec::new();
            for (name, prop) in props {
                if self.is_excluded(prop) {
                    let mut marker = Map::new();
                    marker.insert(EXCLUDED_MARKER.into(), Value::from(flag));
                    prepared.insert(name.clone(), json!({ "not": Value::Object(marker) }));
                    excluded.push(name.as_str());
                } else {
                    prepared.insert(name.clone(), self.prepare(prop));
                }
            }
            out.insert("properties".into(), Value::Object(prepared));

            if let Some(Value::Array(required)) = out.get_mut("required") {
                required.retain(|r| r.as_str().map_or(true, |name| !excluded.contains(&name)));
                if required.is_empty() {
                    out.remove("required");
                }
            }
        }

        let bounds = [("minimum", "exclusiveMinimum"), ("maximum", "exclusiveMaximum")];
        for (bound, exclusive) in bounds {
            if let Some(limit @ Value::Number(_)) = out.get(exclusive).cloned() {
                out.insert(bound.into(), limit);
                out.insert(exclusive.into(), Value::Bool(true));
            }
        }

        let nullable = out.remove("nullable").and_then(|v| v.as_bool()) == Some(true);
        if !nullable {
            return Value::Object(out);
        }

        match out.get("type").cloned() {
            Some(Value::String(ty)) => {
                out.insert("type".into(), json!([ty, "null"]));
            }
            Some(Value::Array(mut types)) => {
                if !types.iter().any(|t| t == "null") {
                    types.push(Value::from("null"));
                }
                out.insert("type".into(), Value::Array(types));
            }
            _ => return json!({ "anyOf": [{ "type": "null" }, Value::Object(out)] }),
        }
        if let Some(Value::Array(options)) = out.get_mut("enum") {
            if !options.contains(&Value::Null) {
                options.push(Value::Null);
            }
        }
        Value::Object(out)
    }

    fn excluded_flag(&self) -> &'static str {
        match self.direction {
            Direction::Request => "readOnly",
            Direction::Response => "writeOnly",
        }
    }

    /// Whether a property schema is readOnly in a request or writeOnly in a response
    fn is_excluded(&self, prop: &Value) -> bool {
        let target = match reference_of(prop) {
            Some(reference) => self
                .resolver
                .lookup(reference)
                .and_then(|t| self.resolver.follow(t).ok()),
            None => Some(prop),
        };
        target
            .and_then(|t| t.get(self.excluded_flag()))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

fn violation_from(error: &ValidationError<'_>) -> Violation {
    let location = error.instance_path.to_string();

    if let ValidationErrorKind::Not { schema } = &error.kind {
        if let Some(flag) = schema.get(EXCLUDED_MARKER).and_then(Value::as_str) {
            let name = location.rsplit('/').next().unwrap_or_default();
            let message = format!("property '{}' is {} and must not be sent here", name, flag);
            return Violation::new(location, flag, message);
        }
    }

    // The failing keyword is the last non-index segment of the schema path
    let schema_path = error.schema_path.to_string();
    let keyword = schema_path
        .rsplit('/')
        .find(|segment| !segment.is_empty() && segment.parse::<usize>().is_err())
        .unwrap_or("schema");
    Violation::new(location, keyword, error.to_string())
}

fn is_uuid(s: &str) -> bool {
    uuid::Uuid::parse_str(s).is_ok()
}

/// A request as seen on the wire, before it reaches the service
#[derive(Debug, Clone, Default)]
pub struct RequestCandidate {
    /// Path parameter values by name
    pub path_params: IndexMap<String, String>,
    /// Query values; an array parameter holds its raw joined text
    pub query: IndexMap<String, String>,
    /// Header values (names compared case-insensitively)
    pub headers: IndexMap<String, String>,
    /// Cookie values
    pub cookies: IndexMap<String, String>,
    /// Items of array parameters, kept apart so an item may contain a comma
    pub lists: IndexMap<String, Vec<String>>,
    /// Content-Type of the body
    pub content_type: Option<String>,
    /// Parsed JSON body
    pub body: Option<Value>,
}

impl RequestCandidate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn json_body(mut self, body: Value) -> Self {
        self.content_type = Some("application/json".to_string());
        self.body = Some(body);
        self
    }

    fn value_at(&self, location: ParameterLocation, name: &str) -> Option<&String> {
        match location {
            ParameterLocation::Path => self.path_params.get(name),
            ParameterLocation::Query => self.query.get(name),
            ParameterLocation::Cookie => self.cookies.get(name),
            ParameterLocation::Header => self
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v),
        }
    }
}

/// A response as received from the service
#[derive(Debug, Clone)]
pub struct ResponseCandidate {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Option<Value>,
}

impl ResponseCandidate {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: None,
        }
    }

    pub fn json_body(mut self, body: Value) -> Self {
        self.content_type = Some("application/json".to_string());
        self.body = Some(body);
        self
    }
}

/// Outcome of validating one side of an exchange
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub operation_id: String,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            return write!(f, "{}: conforms", self.operation_id);
        }
        writeln!(f, "{}: {} violation(s)", self.operation_id, self.violations.len())?;
        for v in &self.violations {
            writeln!(f, "  {}", v)?;
        }
        Ok(())
    }
}

/// Checks request/response candidates against a loaded contract
pub struct ContractValidator<'a> {
    document: &'a ContractDocument,
}

impl<'a> ContractValidator<'a> {
    pub fn new(document: &'a ContractDocument) -> Self {
        Self { document }
    }

    /// Map a concrete method + path onto an operation, extracting path parameter values
    pub fn find_route(
        &self,
        method: HttpMethod,
        path: &str,
    ) -> Option<(&'a ApiOperation, IndexMap<String, String>)> {
        self.document
            .spec
            .operations
            .iter()
            .filter(|op| op.method == method)
            .find_map(|op| {
                OperationExtractor::match_path(&op.path, path).map(|values| (op, values))
            })
    }

    fn operation(&self, operation_id: &str) -> ContractResult<&'a ApiOperation> {
        self.document
            .operation(operation_id)
            .ok_or_else(|| ContractError::OperationNotFound(operation_id.to_string()))
    }

    /// Validate a request against the operation with the given ID
    pub fn validate_request_for(
        &self,
        operation_id: &str,
        candidate: &RequestCandidate,
    ) -> ContractResult<ValidationReport> {
        Ok(self.validate_request(self.operation(operation_id)?, candidate))
    }

    /// Validate a response against the operation with the given ID
    pub fn validate_response_for(
        &self,
        operation_id: &str,
        candidate: &ResponseCandidate,
    ) -> ContractResult<ValidationReport> {
        Ok(self.validate_response(self.operation(operation_id)?, candidate))
    }

    /// Validate a request candidate against an operation
    pub fn validate_request(
        &self,
        operation: &ApiOperation,
        candidate: &RequestCandidate,
    ) -> ValidationReport {
        let resolver = self.document.resolver();
        let validator = SchemaValidator::new(resolver, Direction::Request);
        let mut violations = Vec::new();

        for param in &operation.parameters {
            let location = format!("{}.{}", param.location, param.name);
            let raw = match candidate.value_at(param.location, &param.name) {
                Some(raw) => raw,
                None => {
                    if param.required {
                        violations.push(Violation::new(
                            location,
                            "required",
                            format!("missing required {} parameter", param.location),
                        ));
                    }
                    continue;
                }
            };

            if let Some(schema) = &param.schema {
                let target = resolver.follow(schema).unwrap_or(schema);
                let value = match candidate.lists.get(&param.name) {
                    Some(items) => {
                        let item_schema = target.get("items");
                        Value::Array(
                            items
                                .iter()
                                .map(|item| match item_schema {
                                    Some(s) => {
                                        let s = resolver.follow(s).unwrap_or(s);
                                        coerce_parameter(item, s, &resolver)
                                    }
                                    None => Value::String(item.clone()),
                                })
                                .collect(),
                        )
                    }
                    None => coerce_parameter(raw, target, &resolver),
                };
                for mut v in validator.validate(schema, &value) {
                    v.location = format!("{}{}", location, v.location);
                    violations.push(v);
                }
            }
        }

        match (&operation.request_body, &candidate.body) {
            (Some(body), None) => {
                if body.required {
                    violations.push(Violation::new("body", "required", "request body is required"));
                }
            }
            (None, Some(_)) => {
                violations.push(Violation::new(
                    "body",
                    "requestBody",
                    "operation declares no request body",
                ));
            }
            (Some(body), Some(value)) => {
                let content_type = candidate.content_type.as_deref().unwrap_or(&body.content_type);
                if !body.accepts(content_type) {
                    violations.push(Violation::new(
                        "content-type",
                        "content",
                        format!(
                            "'{}' is not declared; expected one of {}",
                            content_type,
                            body.content_types.join(", ")
                        ),
                    ));
                } else if essence(content_type).contains("json") {
                    if let Some(schema) = &body.schema {
                        violations.extend(prefixed("body", validator.validate(schema, value)));
                    }
                }
            }
            (None, None) => {}
        }

        debug!(
            "Request for {} checked: {} violation(s)",
            operation.operation_id,
            violations.len()
        );

        ValidationReport {
            operation_id: operation.operation_id.clone(),
            violations,
        }
    }

    /// Validate a response candidate against an operation
    pub fn validate_response(
        &self,
        operation: &ApiOperation,
        candidate: &ResponseCandidate,
    ) -> ValidationReport {
        let validator = SchemaValidator::new(self.document.resolver(), Direction::Response);
        let mut violations = Vec::new();

        match operation.response_for(candidate.status) {
            None => violations.push(Violation::new(
                "status",
                "responses",
                format!("status {} is not declared", candidate.status),
            )),
            Some(response) => {
                let declared_content = !response.content_types.is_empty();
                let has_body = candidate.body.as_ref().map(|b| !b.is_null()).unwrap_or(false);

                if let Some(ct) = &candidate.content_type {
                    if declared_content && !response.declares(ct) {
                        violations.push(Violation::new(
                            "content-type",
                            "content",
                            format!("'{}' is not declared for status {}", ct, response.status_code),
                        ));
                    }
                }

                if has_body && !declared_content {
                    violations.push(Violation::new(
                        "body",
                        "content",
                        format!("status {} declares no response body", response.status_code),
                    ));
                }

                let is_json = candidate
                    .content_type
                    .as_deref()
                    .map(|ct| essence(ct).contains("json"))
                    .unwrap_or(true);

                match (&response.schema, &candidate.body) {
                    (Some(schema), Some(body)) if is_json => {
                        violations.extend(prefixed("body", validator.validate(schema, body)));
                    }
                    (Some(_), None) if is_json => violations.push(Violation::new(
                        "body",
                        "content",
                        format!(
                            "status {} declares a body but none was received",
                            response.status_code
                        ),
                    )),
                    _ => {}
                }
            }
        }

        debug!(
            "Response {} for {} checked: {} violation(s)",
            candidate.status,
            operation.operation_id,
            violations.len()
        );

        ValidationReport {
            operation_id: operation.operation_id.clone(),
            violations,
        }
    }
}

fn prefixed(prefix: &str, violations: Vec<Violation>) -> impl Iterator<Item = Violation> + '_ {
    violations.into_iter().map(move |mut v| {
        v.location = format!("{}{}", prefix, v.location);
        v
    })
}

/// Turn a raw parameter string into the JSON value its schema describes.
///
/// Values that do not parse are left as strings so the schema check
/// reports the type mismatch.
pub fn coerce_parameter(raw: &str, schema: &Value, resolver: &SchemaResolver) -> Value {
    let ty = schema.get("type").and_then(Value::as_str).unwrap_or("string");
    match ty {
        "integer" => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        "number" => raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        "boolean" => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        "array" => {
            let items = schema.get("items").map(|s| resolver.follow(s).unwrap_or(s));
            Value::Array(
                raw.split(',')
                    .filter(|part| !part.is_empty())
                    .map(|part| match items {
                        Some(items) => coerce_parameter(part, items, resolver),
                        None => Value::String(part.to_string()),
                    })
                    .collect(),
            )
        }
        _ => Value::String(raw.to_string()),
    }
}
