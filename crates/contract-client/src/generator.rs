//! Rust client stubs from a contract
//!
//! The output is a single source file: one model per component schema, one
//! `...Params` struct per operation with parameters, and an API struct whose
//! async methods forward to [`crate::ContractClient`], so every generated
//! call is validated against the same document at runtime.

use std::collections::HashSet;

use heck::{ToSnakeCase, ToUpperCamelCase};
use indexmap::IndexMap;
use openapi_contract::{essence, ApiOperation, ContractDocument, OperationParameter};
use serde_json::Value;
use tracing::debug;

const KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "dyn", "else", "enum", "extern", "false",
    "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref",
    "return", "static", "struct", "trait", "true", "type", "unsafe", "use", "where", "while",
    "abstract", "become", "box", "do", "final", "macro", "override", "priv", "try", "typeof",
    "unsized", "virtual", "yield",
];

/// Generates Rust client stubs
pub struct StubGenerator {
    api_name: String,
}

impl StubGenerator {
    pub fn new(api_name: impl Into<String>) -> Self {
        Self {
            api_name: api_name.into().to_upper_camel_case(),
        }
    }

    /// Generate the complete source file
    pub fn generate(&self, document: &ContractDocument) -> String {
        let spec = &document.spec;
        let mut code = String::new();

        code.push_str(&format!("//! Client for {} {}\n", spec.title, spec.version));
        code.push_str("//!\n");
        code.push_str(
            "//! Generated by esign-contract from the OpenAPI document. Do not edit by hand.\n\n",
        );
        code.push_str(concat!(
            "use contract_client::",
            "{CallArguments, ClientResult, ContractClient, ContractResponse};\n",
        ));
        code.push_str("use serde::{Deserialize, Serialize};\n");

        let references = ReferenceGraph::new(&spec.schemas);
        for (name, schema) in &spec.schemas {
            code.push('\n');
            code.push_str(&generate_model(name, schema, &references));
        }

        for op in &spec.operations {
            if let Some(params) = generate_params(op) {
                code.push('\n');
                code.push_str(&params);
            }
        }

        code.push('\n');
        code.push_str(&self.generate_api(document));

        debug!(
            "Generated {} model(s) and {} operation(s)",
            spec.schemas.len(),
            spec.operations.len()
        );
        code
    }

    fn generate_api(&self, document: &ContractDocument) -> String {
        let spec = &document.spec;
        let mut code = String::new();

        code.push_str(&doc_comment(
            Some(&format!("{} {}", spec.title, spec.version)),
            "",
        ));
        code.push_str(&format!(
            "pub struct {} {{\n    client: ContractClient,\n}}\n\n",
            self.api_name
        ));
        code.push_str(&format!("impl {} {{\n", self.api_name));
        code.push_str(concat!(
            "    pub fn new(client: ContractClient) -> Self {\n",
            "        Self { client }\n",
            "    }\n\n",
        ));
        code.push_str(concat!(
            "    pub fn client(&self) -> &ContractClient {\n",
            "        &self.client\n",
            "    }\n",
        ));

        for op in &spec.operations {
            code.push('\n');
            code.push_str(&generate_method(op));
        }

        code.push_str("}\n");
        code
    }
}

fn generate_method(op: &ApiOperation) -> String {
    let mut code = String::new();

    code.push_str(&doc_comment(op.summary.as_ref(), "    "));
    let description = op
        .description
        .as_ref()
        .filter(|d| Some(*d) != op.summary.as_ref());
    if let Some(description) = description {
        if op.summary.is_some() {
            code.push_str("    ///\n");
        }
        code.push_str(&doc_comment(Some(description), "    "));
    }
    if op.summary.is_some() || op.description.is_some() {
        code.push_str("    ///\n");
    }
    code.push_str(&format!("    /// `{} {}`\n", op.method, op.path));
    if op.deprecated {
        code.push_str("    #[deprecated]\n");
    }

    let mut args = vec!["&self".to_string()];
    if !op.parameters.is_empty() {
        args.push(format!("params: &{}", params_name(op)));
    }
    let body_type = op.request_body.as_ref().map(|body| {
        body.schema
            .as_ref()
            .map(rust_type)
            .unwrap_or_else(|| "serde_json::Value".to_string())
    });
    if let Some(body_type) = &body_type {
        args.push(format!("body: &{}", body_type));
    }

    let returns = success_type(op);
    code.push_str(&format!(
        "    pub async fn {}({}) -> ClientResult<{}> {{\n",
        ident(&op.function_name),
        args.join(", "),
        returns.as_deref().unwrap_or("ContractResponse")
    ));

    let arguments = match (op.parameters.is_empty(), body_type.is_some()) {
        (true, false) => "CallArguments::new()".to_string(),
        (true, true) => "CallArguments::new().with_body(body)?".to_string(),
        (false, false) => "CallArguments::from_params(params)?".to_string(),
        (false, true) => "CallArguments::from_params(params)?.with_body(body)?".to_string(),
    };
    code.push_str(&format!("        let args = {};\n", arguments));
    let call = format!("self.client.call(\"{}\", args).await", op.operation_id.escape_default());
    match &returns {
        Some(ty) => code.push_str(&format!("        {}?.json::<{}>()\n", call, ty)),
        None => code.push_str(&format!("        {}\n", call)),
    }
    code.push_str("    }\n");

    code
}

/// Type of the JSON body of the first success response, if it has one
fn success_type(op: &ApiOperation) -> Option<String> {
    let response = op.success_responses().next()?;
    let content_type = essence(response.content_type.as_deref()?);
    if !(content_type == "application/json" || content_type.ends_with("+json")) {
        return None;
    }
    let schema = response.schema.as_ref()?;
    if schema.get("format").and_then(Value::as_str) == Some("binary") {
        return None;
    }
    Some(rust_type(schema))
}

fn params_name(op: &ApiOperation) -> String {
    format!("{}Params", op.operation_id.to_upper_camel_case())
}

fn generate_params(op: &ApiOperation) -> Option<String> {
    if op.parameters.is_empty() {
        return None;
    }

    let mut code = String::new();
    code.push_str(&format!("/// Parameters of `{}`\n", op.operation_id));
    code.push_str("#[derive(Debug, Clone, Default, Serialize)]\n");
    code.push_str(&format!("pub struct {} {{\n", params_name(op)));
    for param in &op.parameters {
        code.push_str(&param_field(param));
    }
    code.push_str("}\n");

    Some(code)
}

fn param_field(param: &OperationParameter) -> String {
    let description = param
        .description
        .as_ref()
        .map(|d| format!("{} ({})", d, param.location))
        .unwrap_or_else(|| format!("{} parameter", param.location));
    let ty = param
        .schema
        .as_ref()
        .map(rust_type)
        .unwrap_or_else(|| "String".to_string());

    field(&param.name, &ty, param.required, Some(&description))
}

/// `$ref` edges between component schemas
struct ReferenceGraph<'a> {
    edges: IndexMap<&'a str, Vec<&'a str>>,
}

impl<'a> ReferenceGraph<'a> {
    fn new(schemas: &'a IndexMap<String, Value>) -> Self {
        let edges = schemas
            .iter()
            .map(|(name, schema)| {
                let mut targets = Vec::new();
                collect_references(schema, &mut targets);
                (name.as_str(), targets)
            })
            .collect();
        Self { edges }
    }

    /// Whether `to` is reachable from `from` over one or more references
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            for &next in self.edges.get(current).into_iter().flatten() {
                if next == to {
                    return true;
                }
                if seen.insert(next) {
                    stack.push(next);
                }
            }
        }
        false
    }

    /// Whether a field of `owner` referencing `target` sits on a cycle
    fn on_cycle(&self, owner: &str, target: &str) -> bool {
        self.reaches(target, owner)
    }
}

fn collect_references<'a>(schema: &'a Value, out: &mut Vec<&'a str>) {
    match schema {
        Value::Object(map) => {
            for (key, value) in map {
                match value.as_str().and_then(component_schema) {
                    Some(target) if key == "$ref" => out.push(target),
                    _ => collect_references(value, out),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_references(item, out)),
        _ => {}
    }
}

fn component_schema(reference: &str) -> Option<&str> {
    reference.strip_prefix("#/components/schemas/")
}

/// `T` becomes `Box<T>`, `Option<T>` becomes `Option<Box<T>>`
fn boxed(ty: &str) -> String {
    match ty.strip_prefix("Option<").and_then(|t| t.strip_suffix('>')) {
        Some(inner) => format!("Option<Box<{}>>", inner),
        None => format!("Box<{}>", ty),
    }
}

/// Source for one component schema
fn generate_model(name: &str, schema: &Value, references: &ReferenceGraph) -> String {
    let type_name = name.to_upper_camel_case();
    let description = schema
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);
    let mut code = String::new();

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        code.push_str(&doc_comment(description.as_ref(), ""));
        code.push_str("#[derive(Debug, Clone, Default, Serialize, Deserialize)]\n");
        code.push_str(&format!("pub struct {} {{\n", type_name));
        for (prop, prop_schema) in properties {
            let mut ty = rust_type(prop_schema);
            let target = prop_schema
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(component_schema);
            // A by-value field on a reference cycle would make the type infinitely sized
            if target.is_some_and(|target| references.on_cycle(name, target)) {
                ty = boxed(&ty);
            }
            let prop_description = prop_schema
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string);
            code.push_str(&field(
                prop,
                &ty,
                required.contains(&prop.as_str()),
                prop_description.as_ref(),
            ));
        }
        code.push_str("}\n");
        return code;
    }

    let values: Vec<String> = schema
        .get("enum")
        .and_then(Value::as_array)
        .map(|values| values.iter().map(|v| format!("`{}`", v)).collect())
        .unwrap_or_default();
    let mut docs = description.map(|d| d.trim_end().to_string()).unwrap_or_default();
    if !values.is_empty() {
        if !docs.is_empty() {
            docs.push_str("\n\n");
        }
        docs.push_str(&format!("One of {}", values.join(", ")));
    }
    code.push_str(&doc_comment(Some(&docs).filter(|d| !d.is_empty()), ""));
    code.push_str(&format!("pub type {} = {};\n", type_name, rust_type(schema)));
    code
}

/// One struct field with its serde attributes
fn field(name: &str, ty: &str, required: bool, description: Option<&String>) -> String {
    let mut code = String::new();
    let field_name = ident(&field_base_name(name));
    let optional = !required || ty.starts_with("Option<");

    code.push_str(&doc_comment(description, "    "));
    if field_name.trim_start_matches("r#") != name {
        code.push_str(&format!("    #[serde(rename = \"{}\")]\n", name.escape_default()));
    }
    if optional {
        code.push_str("    #[serde(default, skip_serializing_if = \"Option::is_none\")]\n");
    }
    let ty = if optional && !ty.starts_with("Option<") {
        format!("Option<{}>", ty)
    } else {
        ty.to_string()
    };
    code.push_str(&format!("    pub {}: {},\n", field_name, ty));
    code
}

fn field_base_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_snake_case();

    match cleaned.chars().next() {
        None => "field".to_string(),
        Some(c) if c.is_ascii_digit() => format!("field_{}", cleaned),
        Some(_) => cleaned,
    }
}

/// Escape identifiers that collide with keywords
fn ident(name: &str) -> String {
    match name {
        "self" | "Self" | "super" | "crate" => format!("{}_", name),
        _ if KEYWORDS.contains(&name) => format!("r#{}", name),
        _ => name.to_string(),
    }
}

/// Rust type for a schema; nullable schemas become `Option`
pub fn rust_type(schema: &Value) -> String {
    let base = if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        match component_schema(reference) {
            Some(name) => name.to_upper_camel_case(),
            None => "serde_json::Value".to_string(),
        }
    } else {
        let format = schema.get("format").and_then(Value::as_str);
        match schema.get("type").and_then(Value::as_str) {
            Some("string") => "String".to_string(),
            Some("integer") if format == Some("int32") => "i32".to_string(),
            Some("integer") => "i64".to_string(),
            Some("number") if format == Some("float") => "f32".to_string(),
            Some("number") => "f64".to_string(),
            Some("boolean") => "bool".to_string(),
            Some("array") => format!(
                "Vec<{}>",
                schema
                    .get("items")
                    .map(rust_type)
                    .unwrap_or_else(|| "serde_json::Value".to_string())
            ),
            _ => "serde_json::Value".to_string(),
        }
    };

    if schema.get("nullable").and_then(Value::as_bool) == Some(true) {
        format!("Option<{}>", base)
    } else {
        base
    }
}

fn doc_comment(text: Option<&String>, indent: &str) -> String {
    let mut code = String::new();
    if let Some(text) = text {
        for line in text.trim_end().lines() {
            let line = line.trim_end();
            if line.is_empty() {
                code.push_str(&format!("{}///\n", indent));
            } else {
                code.push_str(&format!("{}/// {}\n", indent, line));
            }
        }
    }
    code
}
