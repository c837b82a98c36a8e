//! OpenAPI 3 to Swagger 2.0 conversion
//!
//! Connector platforms that only accept Swagger 2.0 get a document derived
//! from the OpenAPI 3 contract. Keywords without a 2.0 counterpart survive as
//! `x-` extensions so nothing is silently lost.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::ContractResult;
use crate::resolver::{reference_of, SchemaResolver};
use crate::types::ContractDocument;

/// Schema fields a non-body Swagger 2.0 parameter or header can carry
const PARAMETER_PRIMITIVE_FIELDS: &[&str] = &[
    "type",
    "format",
    "default",
    "maximum",
    "exclusiveMaximum",
    "minimum",
    "exclusiveMinimum",
    "maxLength",
    "minLength",
    "pattern",
    "maxItems",
    "minItems",
    "uniqueItems",
    "multipleOf",
    "enum",
    "collectionFormat",
    "x-nullable",
    "x-deprecated",
    "x-example",
    "x-examples",
];

/// Swagger 2.0 has no TRACE
const SWAGGER_METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch"];

/// `x-ms-connector-metadata` block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectorMetadata {
    pub categories: Vec<String>,
    pub visibility: String,
}

impl Default for ConnectorMetadata {
    fn default() -> Self {
        Self {
            categories: vec!["eSignature".to_string()],
            visibility: "important".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConversionOptions {
    /// Emitted at the root when set
    pub connector_metadata: Option<ConnectorMetadata>,
    /// `x-ms-visibility` for security definitions that do not set one
    pub security_visibility: String,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            connector_metadata: Some(ConnectorMetadata::default()),
            security_visibility: "important".to_string(),
        }
    }
}

/// Converts a loaded OpenAPI 3 document to Swagger 2.0
pub struct SwaggerConverter<'a> {
    source: &'a Value,
    resolver: SchemaResolver<'a>,
    options: ConversionOptions,
}

impl<'a> SwaggerConverter<'a> {
    pub fn new(document: &'a ContractDocument) -> Self {
        Self::with_options(document, ConversionOptions::default())
    }

    pub fn with_options(document: &'a ContractDocument, options: ConversionOptions) -> Self {
        Self {
            source: &document.source,
            resolver: document.resolver(),
            options,
        }
    }

    /// Build the Swagger 2.0 document
    pub fn convert(&self) -> Value {
        info!("Converting OpenAPI document to Swagger 2.0");

        let mut swagger = Map::new();
        swagger.insert("swagger".into(), json!("2.0"));
        swagger.insert(
            "info".into(),
            self.source.get("info").cloned().unwrap_or_else(|| json!({})),
        );
        swagger.insert("consumes".into(), json!(["application/json"]));
        swagger.insert("produces".into(), json!(["application/json"]));
        if let Some(metadata) = &self.options.connector_metadata {
            swagger.insert(
                "x-ms-connector-metadata".into(),
                json!({
                    "categories": metadata.categories,
                    "visibility": metadata.visibility,
                }),
            );
        }

        if let Some(server) = self
            .source
            .get("servers")
            .and_then(Value::as_array)
            .and_then(|s| s.first())
        {
            let url = server.get("url").and_then(Value::as_str).unwrap_or("/");
            let (host, base_path, schemes) = split_server_url(url);
            if let Some(host) = host {
                swagger.insert("host".into(), json!(host));
            }
            if let Some(base_path) = base_path.filter(|p| p != "/") {
                swagger.insert("basePath".into(), json!(base_path));
            }
            if !schemes.is_empty() {
                swagger.insert("schemes".into(), json!(schemes));
            }
        }

        for key in ["tags", "externalDocs", "security"] {
            if let Some(value) = self.source.get(key).filter(|v| !is_empty(v)) {
                swagger.insert(key.into(), value.clone());
            }
        }

        if let Some(components) = self.source.get("components").and_then(Value::as_object) {
            self.convert_components(components, &mut swagger);
        }

        let mut paths = Map::new();
        if let Some(source_paths) = self.source.get("paths").and_then(Value::as_object) {
            for (path, item) in source_paths {
                paths.insert(path.clone(), self.convert_path_item(item));
            }
        }
        debug!("Converted {} path(s)", paths.len());
        swagger.insert("paths".into(), Value::Object(paths));

        copy_extensions(self.source, &mut swagger);

        Value::Object(swagger)
    }

    /// Convert and serialise as YAML, keeping key order
    pub fn to_yaml(&self) -> ContractResult<String> {
        Ok(serde_yaml::to_string(&self.convert())?)
    }

    fn convert_components(
        &self,
        components: &Map<String, Value>,
        swagger: &mut Map<String, Value>,
    ) {
        if let Some(schemas) = components.get("schemas").and_then(Value::as_object) {
            let definitions: Map<String, Value> = schemas
                .iter()
                .map(|(name, schema)| (name.clone(), convert_schema(schema)))
                .collect();
            swagger.insert("definitions".into(), Value::Object(definitions));
        }

        if let Some(parameters) = components.get("parameters").and_then(Value::as_object) {
            let converted: Map<String, Value> = parameters
                .iter()
                .map(|(name, param)| (name.clone(), self.convert_parameter(param)))
                .collect();
            swagger.insert("parameters".into(), Value::Object(converted));
        }

        if let Some(responses) = components.get("responses").and_then(Value::as_object) {
            let mut produces = Vec::new();
            let converted: Map<String, Value> = responses
                .iter()
                .map(|(name, response)| {
                    (name.clone(), self.convert_response(response, &mut produces))
                })
                .collect();
            swagger.insert("responses".into(), Value::Object(converted));
        }

        // Referenced as #/x-requestBodies/... by converted refs
        if let Some(bodies) = components.get("requestBodies").and_then(Value::as_object) {
            let converted: Map<String, Value> = bodies
                .iter()
                .filter_map(|(name, body)| {
                    self.convert_request_body(body)
                        .map(|(param, _)| (name.clone(), param))
                })
                .collect();
            swagger.insert("x-requestBodies".into(), Value::Object(converted));
        }

        if let Some(schemes) = components.get("securitySchemes").and_then(Value::as_object) {
            let definitions: Map<String, Value> = schemes
                .iter()
                .map(|(name, scheme)| (name.clone(), self.convert_security_scheme(scheme)))
                .collect();
            swagger.insert("securityDefinitions".into(), Value::Object(definitions));
        }
    }

    fn convert_security_scheme(&self, scheme: &Value) -> Value {
        let mut converted = scheme.as_object().cloned().unwrap_or_default();

        if converted.get("type").and_then(Value::as_str) == Some("http") {
            let scheme = converted
                .get("scheme")
                .and_then(Value::as_str)
                .map(str::to_lowercase);
            match scheme.as_deref() {
                Some("basic") => {
                    converted.insert("type".into(), json!("basic"));
                    converted.remove("scheme");
                }
                Some("bearer") => {
                    converted.insert("type".into(), json!("apiKey"));
                    converted.entry("name").or_insert_with(|| json!("Authorization"));
                    converted.entry("in").or_insert_with(|| json!("header"));
                    converted.insert("x-original-http-scheme".into(), json!("bearer"));
                    converted.remove("scheme");
                }
                _ => {}
            }
        }

        converted
            .entry("x-ms-visibility")
            .or_insert_with(|| json!(self.options.security_visibility));
        Value::Object(converted)
    }

    fn convert_path_item(&self, item: &Value) -> Value {
        let mut converted = Map::new();
        let Some(item) = item.as_object() else {
            return Value::Object(converted);
        };

        if let Some(parameters) = item.get("parameters").and_then(Value::as_array) {
            converted.insert(
                "parameters".into(),
                parameters.iter().map(|p| self.convert_parameter(p)).collect(),
            );
        }

        for method in SWAGGER_METHODS {
            if let Some(operation) = item.get(*method) {
                converted.insert((*method).into(), self.convert_operation(operation));
            }
        }

        for (key, value) in item {
            if key.starts_with("x-") {
                converted.insert(key.clone(), value.clone());
            } else if key == "servers" {
                converted.insert("x-servers".into(), value.clone());
            }
        }

        Value::Object(converted)
    }

    fn convert_operation(&self, operation: &Value) -> Value {
        let mut converted = Map::new();
        let Some(operation) = operation.as_object() else {
            return Value::Object(converted);
        };

        for key in [
            "tags",
            "summary",
            "description",
            "operationId",
            "deprecated",
            "security",
            "externalDocs",
        ] {
            if let Some(value) = operation.get(key) {
                converted.insert(key.into(), value.clone());
            }
        }

        let mut parameters: Vec<Value> = operation
            .get("parameters")
            .and_then(Value::as_array)
            .map(|params| params.iter().map(|p| self.convert_parameter(p)).collect())
            .unwrap_or_default();

        let mut consumes = Vec::new();
        if let Some((body, media_type)) = operation
            .get("requestBody")
            .and_then(|body| self.convert_request_body(body))
        {
            parameters.push(body);
            consumes.push(media_type);
        }
        if !parameters.is_empty() {
            converted.insert("parameters".into(), Value::Array(parameters));
        }

        let mut produces = Vec::new();
        let mut responses = Map::new();
        if let Some(source) = operation.get("responses").and_then(Value::as_object) {
            for (status, response) in source {
                responses.insert(status.clone(), self.convert_response(response, &mut produces));
            }
        }
        converted.insert("responses".into(), Value::Object(responses));

        if !consumes.is_empty() {
            converted.insert("consumes".into(), json!(sorted_unique(consumes)));
        }
        if !produces.is_empty() {
            converted.insert("produces".into(), json!(sorted_unique(produces)));
        }

        for (key, value) in operation {
            if key.starts_with("x-") {
                converted.insert(key.clone(), value.clone());
            } else if key == "callbacks" {
                converted.insert("x-callbacks".into(), value.clone());
            } else if key == "servers" {
                converted.insert("x-servers".into(), value.clone());
            }
        }

        Value::Object(converted)
    }

    fn convert_parameter(&self, parameter: &Value) -> Value {
        if let Some(reference) = reference_of(parameter) {
            return json!({ "$ref": convert_ref(reference) });
        }
        let Some(param) = parameter.as_object() else {
            return parameter.clone();
        };

        let mut converted = Map::new();
        for key in ["name", "in", "description", "required", "deprecated", "allowEmptyValue"] {
            if let Some(value) = param.get(key) {
                let key = if key == "deprecated" { "x-deprecated" } else { key };
                converted.insert(key.into(), value.clone());
            }
        }
        if param.get("in").and_then(Value::as_str) == Some("path") {
            converted.insert("required".into(), json!(true));
        }

        if let Some(schema) = param.get("schema").filter(|s| !is_empty(s)) {
            // Non-body parameters cannot carry a $ref, so inline the target
            let schema = self.resolver.follow(schema).unwrap_or(schema);
            let schema = convert_schema(schema);
            if let Some(schema) = schema.as_object() {
                converted.extend(parameter_fields(schema));
                if let Some(example) = schema.get("example") {
                    converted.entry("x-example").or_insert_with(|| example.clone());
                }
            }
        }

        let explode = param.get("explode").and_then(Value::as_bool).unwrap_or(false);
        let collection_format = match param.get("style").and_then(Value::as_str) {
            Some("form") if explode => Some("multi"),
            Some("form") => Some("csv"),
            Some("spaceDelimited") => Some("ssv"),
            Some("pipeDelimited") => Some("pipes"),
            _ => None,
        };
        if let Some(format) = collection_format {
            converted.insert("collectionFormat".into(), json!(format));
        }

        copy_extensions(parameter, &mut converted);
        Value::Object(converted)
    }

    /// The `body` parameter and its media type
    fn convert_request_body(&self, body: &Value) -> Option<(Value, String)> {
        let body = self.resolver.follow(body).ok()?;
        let (media_type, media) = body.get("content")?.as_object()?.iter().next()?;

        let mut param = Map::new();
        param.insert("name".into(), json!("body"));
        param.insert("in".into(), json!("body"));
        if let Some(description) = body.get("description").filter(|d| !is_empty(d)) {
            param.insert("description".into(), description.clone());
        }
        param.insert(
            "required".into(),
            json!(body.get("required").and_then(Value::as_bool).unwrap_or(false)),
        );

        if let Some(schema) = media.get("schema").filter(|s| !is_empty(s)) {
            param.insert("schema".into(), convert_schema(schema));
        }
        if let Some(example) = media.get("example").filter(|e| !e.is_null()) {
            param.insert("x-example".into(), example.clone());
        }
        if let Some(examples) = media.get("examples").and_then(Value::as_object) {
            let extracted: Map<String, Value> = examples
                .iter()
                .map(|(name, payload)| (name.clone(), example_value(payload).clone()))
                .collect();
            if !extracted.is_empty() {
                param.insert("x-examples".into(), Value::Object(extracted));
            }
        }

        copy_extensions(body, &mut param);
        Some((Value::Object(param), media_type.clone()))
    }

    fn convert_response(&self, response: &Value, produces: &mut Vec<String>) -> Value {
        if let Some(reference) = reference_of(response) {
            return json!({ "$ref": convert_ref(reference) });
        }

        let mut converted = Map::new();
        converted.insert(
            "description".into(),
            response.get("description").cloned().unwrap_or_else(|| json!("")),
        );

        let headers = response
            .get("headers")
            .and_then(Value::as_object)
            .filter(|h| !h.is_empty());
        if let Some(headers) = headers {
            let headers: Map<String, Value> = headers
                .iter()
                .map(|(name, header)| (name.clone(), self.convert_header(header)))
                .collect();
            converted.insert("headers".into(), Value::Object(headers));
        }

        if let Some((media_type, media)) = response
            .get("content")
            .and_then(Value::as_object)
            .and_then(|c| c.iter().next())
        {
            produces.push(media_type.clone());

            if media_type == "application/pdf" {
                converted.insert("schema".into(), json!({ "type": "file" }));
            } else if let Some(schema) = media.get("schema").filter(|s| !is_empty(s)) {
                converted.insert("schema".into(), convert_schema(schema));
            }

            let mut examples = Map::new();
            if let Some(example) = media.get("example").filter(|e| !e.is_null()) {
                examples.insert(media_type.clone(), example.clone());
            }
            if let Some(named) = media.get("examples").and_then(Value::as_object) {
                // Swagger 2.0 keys examples by media type, so the last one wins
                for payload in named.values() {
                    examples.insert(media_type.clone(), example_value(payload).clone());
                }
            }
            if !examples.is_empty() {
                converted.insert("examples".into(), Value::Object(examples));
            }
        }

        copy_extensions(response, &mut converted);
        Value::Object(converted)
    }

    fn convert_header(&self, header: &Value) -> Value {
        let mut converted = Map::new();
        if let Some(description) = header.get("description") {
            converted.insert("description".into(), description.clone());
        }
        if let Some(schema) = header.get("schema").filter(|s| !is_empty(s)) {
            let schema = self.resolver.follow(schema).unwrap_or(schema);
            if let Some(schema) = convert_schema(schema).as_object() {
                converted.extend(parameter_fields(schema));
            }
        }
        copy_extensions(header, &mut converted);
        Value::Object(converted)
    }
}

/// Map a components reference to its Swagger 2.0 location
pub fn convert_ref(reference: &str) -> String {
    const MAPPINGS: &[(&str, &str)] = &[
        ("#/components/schemas/", "#/definitions/"),
        ("#/components/parameters/", "#/parameters/"),
        ("#/components/responses/", "#/responses/"),
        ("#/components/requestBodies/", "#/x-requestBodies/"),
        ("#/components/securitySchemes/", "#/securityDefinitions/"),
    ];

    MAPPINGS
        .iter()
        .find_map(|(from, to)| reference.strip_prefix(from).map(|rest| format!("{}{}", to, rest)))
        .unwrap_or_else(|| reference.to_string())
}

/// Rewrite an OpenAPI 3 schema object into its Swagger 2.0 form
pub fn convert_schema(schema: &Value) -> Value {
    match schema {
        Value::Array(items) => Value::Array(items.iter().map(convert_schema).collect()),
        Value::Object(obj) => {
            let mut converted = Map::new();
            for (key, value) in obj {
                match key.as_str() {
                    "$ref" => {
                        let reference = value
                            .as_str()
                            .map(|r| json!(convert_ref(r)))
                            .unwrap_or_else(|| value.clone());
                        converted.insert(key.clone(), reference);
                    }
                    "nullable" => {
                        if value.as_bool() == Some(true) {
                            converted.insert("x-nullable".into(), json!(true));
                        }
                    }
                    "deprecated" | "discriminator" | "examples" => {
                        converted.insert(format!("x-{}", key), value.clone());
                    }
                    "example" | "xml" => {
                        converted.insert(key.clone(), value.clone());
                    }
                    "allOf" | "anyOf" | "oneOf" | "not" => {
                        converted.insert(format!("x-{}", key), convert_schema(value));
                    }
                    "properties" | "patternProperties" => {
                        let members = match value.as_object() {
                            Some(members) => Value::Object(
                                members
                                    .iter()
                                    .map(|(name, member)| (name.clone(), convert_schema(member)))
                                    .collect(),
                            ),
                            None => value.clone(),
                        };
                        converted.insert(key.clone(), members);
                    }
                    _ => {
                        converted.insert(key.clone(), convert_schema(value));
                    }
                }
            }
            Value::Object(converted)
        }
        other => other.clone(),
    }
}

/// Flatten a converted schema into parameter/header fields
fn parameter_fields(schema: &Map<String, Value>) -> Map<String, Value> {
    let mut fields = Map::new();

    if schema.get("type").and_then(Value::as_str) == Some("array") {
        if let Some(items) = schema.get("items").and_then(Value::as_object) {
            fields.insert("items".into(), Value::Object(parameter_fields(items)));
        }
    }
    for field in PARAMETER_PRIMITIVE_FIELDS {
        if let Some(value) = schema.get(*field) {
            fields.insert((*field).into(), value.clone());
        }
    }
    for (key, value) in schema {
        if key.starts_with("x-") && !fields.contains_key(key) {
            fields.insert(key.clone(), value.clone());
        }
    }

    fields
}

/// `(host, basePath, schemes)` of a server URL; relative URLs only give a base path
fn split_server_url(url: &str) -> (Option<String>, Option<String>, Vec<String>) {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().map(|host| match parsed.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            });
            let path = Some(parsed.path().to_string()).filter(|p| !p.is_empty());
            (host, path, vec![parsed.scheme().to_string()])
        }
        Err(_) => (None, Some(url.to_string()).filter(|u| u.starts_with('/')), Vec::new()),
    }
}

/// The payload of an Example object, or the value itself
fn example_value(payload: &Value) -> &Value {
    payload.get("value").unwrap_or(payload)
}

fn copy_extensions(source: &Value, target: &mut Map<String, Value>) {
    if let Some(obj) = source.as_object() {
        for (key, value) in obj.iter().filter(|(k, _)| k.starts_with("x-")) {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn sorted_unique(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items.dedup();
    items
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(obj) => obj.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
