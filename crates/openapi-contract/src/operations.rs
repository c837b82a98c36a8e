//! Operation extraction from OpenAPI documents

use heck::ToSnakeCase;
use indexmap::IndexMap;
use tracing::warn;

use crate::error::ContractResult;
use crate::resolver::SchemaResolver;
use crate::types::*;

/// Extracts operations from raw OpenAPI structures
pub struct OperationExtractor;

impl OperationExtractor {
    /// Extract all operations from a raw OpenAPI document
    pub fn extract(
        spec: &RawOpenApiSpec,
        resolver: &SchemaResolver,
    ) -> ContractResult<Vec<ApiOperation>> {
        let mut operations = Vec::new();

        for (path, path_item) in &spec.paths {
            // Path-level parameters apply to every operation below
            let path_params: Vec<OperationParameter> = path_item
                .parameters
                .iter()
                .filter_map(|p| Self::convert_parameter(p, resolver))
                .collect();

            for method in HttpMethod::ALL {
                if let Some(op) = path_item.operation(method) {
                    let api_op =
                        Self::extract_operation(path, method, op, &path_params, spec, resolver)?;
                    operations.push(api_op);
                }
            }
        }

        Ok(operations)
    }

    /// Extract a single operation
    fn extract_operation(
        path: &str,
        method: HttpMethod,
        operation: &RawOperation,
        path_params: &[OperationParameter],
        spec: &RawOpenApiSpec,
        resolver: &SchemaResolver,
    ) -> ContractResult<ApiOperation> {
        let operation_id = operation
            .operation_id
            .clone()
            .unwrap_or_else(|| Self::generate_operation_id(path, method));

        let function_name = Self::function_name(&operation_id);

        // Operation-level parameters override path-level ones with the same name and location
        let mut parameters = path_params.to_vec();
        for param in &operation.parameters {
            if let Some(p) = Self::convert_parameter(param, resolver) {
                parameters.retain(|existing| {
                    !(existing.name == p.name && existing.location == p.location)
                });
                parameters.push(p);
            }
        }

        let request_body = operation
            .request_body
            .as_ref()
            .and_then(|body| Self::extract_request_body(body, resolver));

        let responses = Self::extract_responses(&operation.responses, resolver);

        let security = Self::extract_security(operation.security.as_ref(), &spec.security);

        Ok(ApiOperation {
            operation_id,
            function_name,
            method,
            path: path.to_string(),
            summary: operation.summary.clone(),
            description: operation.description.clone(),
            tags: operation.tags.clone(),
            deprecated: operation.deprecated,
            parameters,
            request_body,
            responses,
            security,
        })
    }

    /// Generate an operation ID from path and method
    pub(crate) fn generate_operation_id(path: &str, method: HttpMethod) -> String {
        // /document/{docId}/field -> get_document_docId_field
        let path_part = path
            .trim_matches('/')
            .replace('/', "_")
            .replace(['{', '}'], "");

        if path_part.is_empty() {
            method.key().to_string()
        } else {
            format!("{}_{}", method.key(), path_part)
        }
    }

    /// snake_case function name for an operation ID
    pub(crate) fn function_name(operation_id: &str) -> String {
        let name: String = operation_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect::<String>()
            .to_snake_case();

        match name.chars().next() {
            None => "operation".to_string(),
            Some(c) if c.is_ascii_digit() => format!("op_{}", name),
            Some(_) => name,
        }
    }

    /// Convert a raw parameter, following `$ref` into components
    fn convert_parameter(
        param: &RawParameter,
        resolver: &SchemaResolver,
    ) -> Option<OperationParameter> {
        if let Some(reference) = &param.reference {
            let target = match resolver.lookup(reference).map(|t| resolver.follow(t)) {
                Some(Ok(target)) => target,
                _ => {
                    warn!("Skipping unresolved parameter reference {}", reference);
                    return None;
                }
            };
            return match serde_json::from_value::<RawParameter>(target.clone()) {
                Ok(resolved) if resolved.reference.is_none() => {
                    Self::convert_parameter(&resolved, resolver)
                }
                Ok(_) => None,
                Err(e) => {
                    warn!("Skipping malformed parameter {}: {}", reference, e);
                    None
                }
            };
        }

        let location = ParameterLocation::parse(&param.location)?;

        Some(OperationParameter {
            name: param.name.clone(),
            location,
            required: param.required || location == ParameterLocation::Path,
            description: param.description.clone(),
            schema: param.schema.clone(),
            example: param.example.clone(),
            deprecated: param.deprecated,
            style: param.style.clone(),
            explode: param.explode,
        })
    }

    /// Extract request body information
    fn extract_request_body(
        body: &RawRequestBody,
        resolver: &SchemaResolver,
    ) -> Option<RequestBody> {
        let resolved;
        let body = match &body.reference {
            Some(reference) => {
                let target = resolver.lookup(reference)?;
                resolved = serde_json::from_value::<RawRequestBody>(target.clone()).ok()?;
                &resolved
            }
            None => body,
        };

        let (content_type, media) = Self::preferred_media(&body.content)?;

        Some(RequestBody {
            required: body.required,
            content_type: content_type.clone(),
            content_types: body.content.keys().cloned().collect(),
            schema: media.schema.clone(),
            description: body.description.clone(),
        })
    }

    /// Extract response information
    fn extract_responses(
        responses: &IndexMap<String, RawResponse>,
        resolver: &SchemaResolver,
    ) -> Vec<ResponseSchema> {
        responses
            .iter()
            .map(|(status, response)| {
                let dereferenced = response
                    .reference
                    .as_ref()
                    .and_then(|r| resolver.lookup(r))
                    .and_then(|target| serde_json::from_value::<RawResponse>(target.clone()).ok());
                let response = dereferenced.as_ref().unwrap_or(response);

                let content = response.content.clone().unwrap_or_default();
                let (content_type, schema) = Self::preferred_media(&content)
                    .map(|(ct, media)| (Some(ct.clone()), media.schema.clone()))
                    .unwrap_or((None, None));

                ResponseSchema {
                    status_code: status.clone(),
                    content_type,
                    content_types: content.keys().cloned().collect(),
                    schema,
                    description: response.description.clone(),
                }
            })
            .collect()
    }

    /// Prefer a JSON media type, otherwise the first declared one
    fn preferred_media(
        content: &IndexMap<String, RawMediaType>,
    ) -> Option<(&String, &RawMediaType)> {
        content
            .iter()
            .find(|(ct, _)| ct.contains("json"))
            .or_else(|| content.first())
    }

    /// Extract security requirements; an operation-level list (even an empty one)
    /// replaces the global one
    fn extract_security(
        operation_security: Option<&Vec<IndexMap<String, Vec<String>>>>,
        global_security: &[IndexMap<String, Vec<String>>],
    ) -> Vec<SecurityRequirement> {
        let security: &[IndexMap<String, Vec<String>>] = operation_security
            .map(|v| v.as_slice())
            .unwrap_or(global_security);

        security
            .iter()
            .flat_map(|req| {
                req.iter().map(|(name, scopes)| SecurityRequirement {
                    scheme_name: name.clone(),
                    scopes: scopes.clone(),
                })
            })
            .collect()
    }

    /// Placeholder names in a path template, in order (`/a/{x}/b/{y}` -> `[x, y]`)
    pub fn template_parameters(template: &str) -> Vec<&str> {
        let mut names = Vec::new();
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    names.push(&after[..end]);
                    rest = &after[end + 1..];
                }
                None => break,
            }
        }
        names
    }

    /// Match a concrete request path against a path template.
    ///
    /// Returns the extracted path parameter values when every literal
    /// segment matches. Trailing slashes are significant only when the
    /// template has one.
    pub fn match_path(template: &str, concrete: &str) -> Option<IndexMap<String, String>> {
        let concrete = concrete.split(['?', '#']).next().unwrap_or_default();
        let template_segments: Vec<&str> = template.split('/').collect();
        let concrete_segments: Vec<&str> = concrete.split('/').collect();

        if template_segments.len() != concrete_segments.len() {
            return None;
        }

        let mut values = IndexMap::new();
        for (tpl, actual) in template_segments.iter().zip(&concrete_segments) {
            if let (Some(open), Some(close)) = (tpl.find('{'), tpl.rfind('}')) {
                let prefix = &tpl[..open];
                let suffix = &tpl[close + 1..];
                if actual.len() < prefix.len() + suffix.len()
                    || !actual.starts_with(prefix)
                    || !actual.ends_with(suffix)
                {
                    return None;
                }
                let value = &actual[prefix.len()..actual.len() - suffix.len()];
                if value.is_empty() {
                    return None;
                }
                values.insert(tpl[open + 1..close].to_string(), value.to_string());
            } else if tpl != actual {
                return None;
            }
        }

        Some(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_function_name_camel_case() {
        assert_eq!(OperationExtractor::function_name("createDocument"), "create_document");
        assert_eq!(OperationExtractor::function_name("getPDFDownload"), "get_pdf_download");
    }

    #[test]
    fn test_function_name_from_generated_id() {
        assert_eq!(
            OperationExtractor::function_name("get_document_docId_field"),
            "get_document_doc_id_field"
        );
        assert_eq!(OperationExtractor::function_name("document.create"), "document_create");
    }

    #[test]
    fn test_generate_operation_id() {
        assert_eq!(
            OperationExtractor::generate_operation_id("/document/{docId}/field/", HttpMethod::Get),
            "get_document_docId_field"
        );
        assert_eq!(OperationExtractor::generate_operation_id("/", HttpMethod::Head), "head");
    }

    #[test]
    fn test_template_parameters() {
        assert_eq!(
            OperationExtractor::template_parameters("/signer/{signerId}/rejection/{id}.json"),
            vec!["signerId", "id"]
        );
        assert!(OperationExtractor::template_parameters("/status/").is_empty());
    }

    #[test]
    fn test_match_path() {
        let values =
            OperationExtractor::match_path("/document/{docId}/", "/document/abc-123/").unwrap();
        assert_eq!(values["docId"], "abc-123");

        let values =
            OperationExtractor::match_path("/pdf/{docId}.pdf", "/pdf/xyz.pdf?download=1").unwrap();
        assert_eq!(values["docId"], "xyz");

        assert!(OperationExtractor::match_path("/document/{docId}/", "/document/abc").is_none());
        assert!(OperationExtractor::match_path("/document/{docId}/", "/document//").is_none());
        assert!(OperationExtractor::match_path("/document/", "/template/").is_none());
    }

    #[test]
    fn test_parameter_reference_is_resolved() {
        let doc = json!({
            "components": {"parameters": {"Limit": {
                "name": "limit", "in": "query", "schema": {"type": "integer"}
            }}}
        });
        let resolver = SchemaResolver::new(&doc);
        let raw: RawParameter =
            serde_json::from_value(json!({"$ref": "#/components/parameters/Limit"})).unwrap();

        let param = OperationExtractor::convert_parameter(&raw, &resolver).unwrap();
        assert_eq!(param.name, "limit");
        assert_eq!(param.location, ParameterLocation::Query);
        assert!(!param.required);
    }

    #[test]
    fn test_empty_operation_security_means_anonymous() {
        let mut global = IndexMap::new();
        global.insert("apiKey".to_string(), vec![]);
        let globals = vec![global];

        let inherited = OperationExtractor::extract_security(None, &globals);
        assert_eq!(inherited.len(), 1);

        let anonymous = OperationExtractor::extract_security(Some(&vec![]), &globals);
        assert!(anonymous.is_empty());
    }
}
