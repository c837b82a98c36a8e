//! Structural checks over a loaded contract
//!
//! These are the properties an API description has to hold before SDK
//! generators and documentation renderers can rely on it: every reference
//! resolves, every operation has a success response with a consistent
//! content type, operation IDs are unique, path templates agree with their
//! declared parameters and security requirements name real schemes.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::operations::OperationExtractor;
use crate::resolver::{escape_pointer_segment, SchemaResolver};
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// The individual checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LintRule {
    DanglingRef,
    ExternalRef,
    MissingSuccessResponse,
    InconsistentContentType,
    UnexpectedContentType,
    DuplicateOperationId,
    MissingOperationId,
    PathParameterMismatch,
    UnknownSecurityScheme,
    UnusedComponent,
    MissingServers,
}

impl LintRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            LintRule::DanglingRef => "dangling-ref",
            LintRule::ExternalRef => "external-ref",
            LintRule::MissingSuccessResponse => "missing-success-response",
            LintRule::InconsistentContentType => "inconsistent-content-type",
            LintRule::UnexpectedContentType => "unexpected-content-type",
            LintRule::DuplicateOperationId => "duplicate-operation-id",
            LintRule::MissingOperationId => "missing-operation-id",
            LintRule::PathParameterMismatch => "path-parameter-mismatch",
            LintRule::UnknownSecurityScheme => "unknown-security-scheme",
            LintRule::UnusedComponent => "unused-component",
            LintRule::MissingServers => "missing-servers",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            LintRule::ExternalRef
            | LintRule::UnexpectedContentType
            | LintRule::MissingOperationId
            | LintRule::UnusedComponent
            | LintRule::MissingServers => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl std::fmt::Display for LintRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One problem found in the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub rule: LintRule,
    /// JSON pointer into the document
    pub location: String,
    pub message: String,
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}] {}: {}",
            self.severity, self.rule, self.location, self.message
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LintReport {
    pub findings: Vec<Finding>,
}

impl LintReport {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity == Severity::Warning)
    }

    /// Findings for one rule
    pub fn by_rule(&self, rule: LintRule) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.rule == rule)
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

impl std::fmt::Display for LintReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for finding in &self.findings {
            writeln!(f, "{}", finding)?;
        }
        write!(
            f,
            "{} error(s), {} warning(s)",
            self.errors().count(),
            self.warnings().count()
        )
    }
}

/// Linter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LintSettings {
    /// Media types operations may declare (`type/*` wildcards allowed)
    pub allowed_content_types: Vec<String>,
    /// Warn about operations without an explicit operationId
    pub require_operation_ids: bool,
    /// Warn about component schemas nothing references
    pub warn_unused_components: bool,
}

impl Default for LintSettings {
    fn default() -> Self {
        Self {
            allowed_content_types: vec![
                "application/json".to_string(),
                "application/pdf".to_string(),
            ],
            require_operation_ids: true,
            warn_unused_components: true,
        }
    }
}

/// Runs every check over a document
pub struct ContractLinter<'a> {
    document: &'a ContractDocument,
    settings: LintSettings,
}

impl<'a> ContractLinter<'a> {
    pub fn new(document: &'a ContractDocument) -> Self {
        Self::with_settings(document, LintSettings::default())
    }

    pub fn with_settings(document: &'a ContractDocument, settings: LintSettings) -> Self {
        Self { document, settings }
    }

    pub fn lint(&self) -> LintReport {
        let mut findings = Vec::new();

        self.check_references(&mut findings);
        self.check_servers(&mut findings);
        self.check_operation_ids(&mut findings);
        self.check_security(&mut findings);
        for op in &self.document.spec.operations {
            self.check_success_response(op, &mut findings);
            self.check_content_types(op, &mut findings);
            self.check_path_parameters(op, &mut findings);
        }
        if self.settings.warn_unused_components {
            self.check_unused_components(&mut findings);
        }

        debug!("Lint produced {} finding(s)", findings.len());
        LintReport { findings }
    }

    fn push(findings: &mut Vec<Finding>, rule: LintRule, location: String, message: String) {
        findings.push(Finding {
            severity: rule.severity(),
            rule,
            location,
            message,
        });
    }

    fn operation_pointer(op: &ApiOperation) -> String {
        format!("/paths/{}/{}", escape_pointer_segment(&op.path), op.method.key())
    }

    fn check_references(&self, findings: &mut Vec<Finding>) {
        let resolver = self.document.resolver();
        for site in SchemaResolver::collect_refs(&self.document.source) {
            if !SchemaResolver::is_local(&site.reference) {
                Self::push(
                    findings,
                    LintRule::ExternalRef,
                    site.pointer,
                    format!("external reference '{}' is not followed", site.reference),
                );
            } else if resolver.lookup(&site.reference).is_none() {
                Self::push(
                    findings,
                    LintRule::DanglingRef,
                    site.pointer,
                    format!("'{}' does not resolve", site.reference),
                );
            }
        }
    }

    fn check_servers(&self, findings: &mut Vec<Finding>) {
        if self.document.spec.servers.is_empty() {
            Self::push(
                findings,
                LintRule::MissingServers,
                "/servers".to_string(),
                "no server is declared; clients need an explicit base URL".to_string(),
            );
        }
    }

    fn check_operation_ids(&self, findings: &mut Vec<Finding>) {
        let mut seen = HashSet::new();
        for op in &self.document.spec.operations {
            let pointer = Self::operation_pointer(op);
            let declared = self
                .document
                .source
                .pointer(&format!("{}/operationId", pointer))
                .is_some();

            if !declared && self.settings.require_operation_ids {
                Self::push(
                    findings,
                    LintRule::MissingOperationId,
                    pointer.clone(),
                    format!(
                        "{} {} has no operationId; using '{}'",
                        op.method, op.path, op.operation_id
                    ),
                );
            }

            if !seen.insert(op.operation_id.as_str()) {
                Self::push(
                    findings,
                    LintRule::DuplicateOperationId,
                    format!("{}/operationId", pointer),
                    format!("operationId '{}' is used more than once", op.operation_id),
                );
            }
        }
    }

    fn check_security(&self, findings: &mut Vec<Finding>) {
        let defined = self
            .document
            .source
            .pointer("/components/securitySchemes")
            .and_then(Value::as_object);
        let is_defined = |name: &str| defined.map(|d| d.contains_key(name)).unwrap_or(false);

        for req in &self.document.spec.global_security {
            if !is_defined(&req.scheme_name) {
                Self::push(
                    findings,
                    LintRule::UnknownSecurityScheme,
                    "/security".to_string(),
                    format!("security scheme '{}' is not defined", req.scheme_name),
                );
            }
        }

        let global: HashSet<&str> = self
            .document
            .spec
            .global_security
            .iter()
            .map(|r| r.scheme_name.as_str())
            .collect();

        for op in &self.document.spec.operations {
            for req in &op.security {
                // Inherited requirements were already reported once at the root
                if global.contains(req.scheme_name.as_str()) {
                    continue;
                }
                if !is_defined(&req.scheme_name) {
                    Self::push(
                        findings,
                        LintRule::UnknownSecurityScheme,
                        format!("{}/security", Self::operation_pointer(op)),
                        format!("security scheme '{}' is not defined", req.scheme_name),
                    );
                }
            }
        }
    }

    fn check_success_response(&self, op: &ApiOperation, findings: &mut Vec<Finding>) {
        if op.success_responses().next().is_none() {
            Self::push(
                findings,
                LintRule::MissingSuccessResponse,
                format!("{}/responses", Self::operation_pointer(op)),
                format!("{} declares no 2xx response", op.operation_id),
            );
        }
    }

    fn check_content_types(&self, op: &ApiOperation, findings: &mut Vec<Finding>) {
        let pointer = Self::operation_pointer(op);

        let mut sets: Vec<(String, Vec<String>)> = Vec::new();
        for response in op.success_responses().filter(|r| !r.content_types.is_empty()) {
            let mut set: Vec<String> =
                response.content_types.iter().map(|ct| essence(ct)).collect();
            set.sort();
            set.dedup();
            sets.push((response.status_code.clone(), set));
        }
        if let Some((first_status, first)) = sets.first() {
            for (status, set) in &sets[1..] {
                if set != first {
                    Self::push(
                        findings,
                        LintRule::InconsistentContentType,
                        format!("{}/responses/{}/content", pointer, escape_pointer_segment(status)),
                        format!(
                            "{} returns [{}] for {} but [{}] for {}",
                            op.operation_id,
                            first.join(", "),
                            first_status,
                            set.join(", "),
                            status
                        ),
                    );
                }
            }
        }

        let mut declared: Vec<(String, &str)> = Vec::new();
        if let Some(body) = &op.request_body {
            for ct in &body.content_types {
                declared.push((format!("{}/requestBody/content", pointer), ct));
            }
        }
        for response in &op.responses {
            for ct in &response.content_types {
                declared.push((
                    format!(
                        "{}/responses/{}/content",
                        pointer,
                        escape_pointer_segment(&response.status_code)
                    ),
                    ct,
                ));
            }
        }

        let mut reported = HashSet::new();
        for (location, ct) in declared {
            if self.is_allowed(ct) || !reported.insert(essence(ct)) {
                continue;
            }
            Self::push(
                findings,
                LintRule::UnexpectedContentType,
                location,
                format!("{} uses media type '{}' outside the allowed list", op.operation_id, ct),
            );
        }
    }

    fn is_allowed(&self, content_type: &str) -> bool {
        let ct = essence(content_type);
        self.settings.allowed_content_types.iter().any(|allowed| {
            let allowed = essence(allowed);
            allowed == ct
                || allowed == "*/*"
                || (allowed.ends_with("/*") && ct.starts_with(allowed.trim_end_matches('*')))
        })
    }

    fn check_path_parameters(&self, op: &ApiOperation, findings: &mut Vec<Finding>) {
        let pointer = Self::operation_pointer(op);
        let in_template = OperationExtractor::template_parameters(&op.path);
        let declared: Vec<&str> = op
            .parameters_in(ParameterLocation::Path)
            .map(|p| p.name.as_str())
            .collect();

        for name in &in_template {
            if !declared.contains(name) {
                Self::push(
                    findings,
                    LintRule::PathParameterMismatch,
                    pointer.clone(),
                    format!("path placeholder '{{{}}}' has no path parameter", name),
                );
            }
        }
        for name in &declared {
            if !in_template.contains(name) {
                Self::push(
                    findings,
                    LintRule::PathParameterMismatch,
                    format!("{}/parameters", pointer),
                    format!("path parameter '{}' does not appear in {}", name, op.path),
                );
            }
        }
    }

    fn check_unused_components(&self, findings: &mut Vec<Finding>) {
        let referenced: HashSet<String> = SchemaResolver::collect_refs(&self.document.source)
            .into_iter()
            .map(|site| site.reference)
            .collect();

        for name in self.document.spec.schemas.keys() {
            let reference = format!("#/components/schemas/{}", escape_pointer_segment(name));
            if !referenced.contains(&reference) {
                Self::push(
                    findings,
                    LintRule::UnusedComponent,
                    format!("/components/schemas/{}", escape_pointer_segment(name)),
                    format!("schema '{}' is never referenced", name),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tests::SAMPLE_SPEC;
    use crate::parser::OpenApiParser;

    fn lint(yaml: &str) -> LintReport {
        let doc = OpenApiParser::parse_yaml(yaml).unwrap();
        ContractLinter::new(&doc).lint()
    }

    fn rules(report: &LintReport) -> Vec<LintRule> {
        report.findings.iter().map(|f| f.rule).collect()
    }

    #[test]
    fn test_sample_has_no_errors() {
        let report = lint(SAMPLE_SPEC);
        assert!(!report.has_errors(), "{}", report);
        // The generated DELETE operation id is the only warning
        assert_eq!(rules(&report), vec![LintRule::MissingOperationId]);
    }

    #[test]
    fn test_dangling_and_external_refs() {
        let report = lint(
            r#"
openapi: 3.0.0
info: {title: T, version: "1"}
servers: [{url: "https://example.com"}]
paths:
  /signer/{signerId}/:
    get:
      operationId: getSigner
      parameters:
        - {name: signerId, in: path, required: true, schema: {type: string}}
      responses:
        '200':
          description: ok
          content:
            application/json:
              schema: {$ref: '#/components/schemas/Signer'}
        '400':
          description: bad
          content:
            application/json:
              schema: {$ref: 'errors.yaml#/Error'}
"#,
        );

        assert!(report.has_errors());
        assert_eq!(rules(&report), vec![LintRule::DanglingRef, LintRule::ExternalRef]);
        assert_eq!(
            report.findings[0].location,
            "/paths/~1signer~1{signerId}~1/get/responses/200/content/application~1json/schema"
        );
    }

    #[test]
    fn test_missing_success_and_inconsistent_content() {
        let report = lint(
            r#"
openapi: 3.0.0
info: {title: T, version: "1"}
servers: [{url: "https://example.com"}]
paths:
  /status/:
    get:
      operationId: getStatus
      responses:
        '404': {description: missing}
  /pdf/{docId}/:
    get:
      operationId: getPdf
      parameters:
        - {name: docId, in: path, schema: {type: string}}
      responses:
        '200':
          description: pdf
          content:
            application/pdf: {}
        '202':
          description: pending
          content:
            application/json:
              schema: {type: object}
"#,
        );

        assert_eq!(
            rules(&report),
            vec![LintRule::MissingSuccessResponse, LintRule::InconsistentContentType]
        );
        assert_eq!(report.errors().count(), 2);
    }

    #[test]
    fn test_path_parameter_mismatch_and_duplicates() {
        let report = lint(
            r#"
openapi: 3.0.0
info: {title: T, version: "1"}
servers: [{url: "https://example.com"}]
paths:
  /template/{templateId}/:
    get:
      operationId: getTemplate
      parameters:
        - {name: id, in: path, schema: {type: string}}
      responses:
        '200': {description: ok}
  /templatepdf/:
    get:
      operationId: getTemplate
      responses:
        '200': {description: ok}
"#,
        );

        assert_eq!(
            rules(&report),
            vec![
                LintRule::DuplicateOperationId,
                LintRule::PathParameterMismatch,
                LintRule::PathParameterMismatch,
            ]
        );
    }

    #[test]
    fn test_unknown_security_scheme_and_warnings() {
        let report = lint(
            r#"
openapi: 3.0.0
info: {title: T, version: "1"}
security:
  - apiKey: []
paths:
  /group/:
    get:
      operationId: listGroups
      security:
        - oauth: [read]
      responses:
        '200':
          description: ok
          content:
            text/csv: {}
components:
  securitySchemes:
    apiKey: {type: apiKey, in: header, name: Authorization}
  schemas:
    Orphan: {type: string}
"#,
        );

        assert_eq!(
            rules(&report),
            vec![
                LintRule::MissingServers,
                LintRule::UnknownSecurityScheme,
                LintRule::UnexpectedContentType,
                LintRule::UnusedComponent,
            ]
        );
        assert_eq!(report.warnings().count(), 3);
    }

    #[test]
    fn test_settings_toggle_rules() {
        let doc = OpenApiParser::parse_yaml(SAMPLE_SPEC).unwrap();
        let settings = LintSettings {
            allowed_content_types: vec!["application/*".to_string()],
            require_operation_ids: false,
            warn_unused_components: false,
        };

        let report = ContractLinter::with_settings(&doc, settings).lint();
        assert!(report.is_clean(), "{}", report);
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: LintSettings =
            serde_json::from_str(r#"{"requireOperationIds": false}"#).unwrap();
        assert!(!settings.require_operation_ids);
        assert!(settings.warn_unused_components);
        assert_eq!(settings.allowed_content_types.len(), 2);
    }
}
