//! Checks over the contract document shipped in `contract/`

use openapi_contract::{
    ContractLinter, ContractValidator, HttpMethod, OpenApiParser, ResponseCandidate,
    SwaggerConverter,
};
use serde_json::json;

const CONTRACT: &str = include_str!("../../../contract/esign-api-v1.yaml");

#[test]
fn contract_parses_as_openapi_3() {
    let doc = OpenApiParser::parse_yaml(CONTRACT).unwrap();

    assert!(doc.spec.openapi_version.starts_with("3."));
    assert_eq!(doc.default_server(), Some("https://eu-api.example.com/api/v1"));
    assert!(!doc.spec.operations.is_empty());
}

#[test]
fn contract_lints_clean() {
    let doc = OpenApiParser::parse_yaml(CONTRACT).unwrap();
    let report = ContractLinter::new(&doc).lint();

    assert!(report.is_clean(), "{}", report);
}

#[test]
fn every_operation_has_a_success_response() {
    let doc = OpenApiParser::parse_yaml(CONTRACT).unwrap();

    for op in &doc.spec.operations {
        assert!(
            op.success_responses().next().is_some(),
            "{} has no success response",
            op.operation_id
        );
    }
}

#[test]
fn captured_responses_are_checked_for_drift() {
    let doc = OpenApiParser::parse_yaml(CONTRACT).unwrap();
    let validator = ContractValidator::new(&doc);

    let (op, params) = validator
        .find_route(HttpMethod::Get, "/document/0d6c2f8e-5e0a-4b7b-9a3c-1f7f0e1d2c3b/")
        .unwrap();
    assert_eq!(op.operation_id, "getDocument");
    assert_eq!(params["docId"], "0d6c2f8e-5e0a-4b7b-9a3c-1f7f0e1d2c3b");

    let captured = ResponseCandidate::new(200).json_body(json!({
        "uuid": "0d6c2f8e-5e0a-4b7b-9a3c-1f7f0e1d2c3b",
        "name": "Employment contract",
        "group": "/api/v1/group/hr/",
        "status": 30,
        "created": "2024-05-01T10:00:00Z",
        "signers": []
    }));
    let report = validator.validate_response(op, &captured);
    assert!(report.is_valid(), "{}", report);

    // The service started returning status codes as strings
    let drifted = ResponseCandidate::new(200).json_body(json!({
        "uuid": "0d6c2f8e-5e0a-4b7b-9a3c-1f7f0e1d2c3b",
        "name": "Employment contract",
        "group": "/api/v1/group/hr/",
        "status": "signed",
        "created": "2024-05-01T10:00:00Z"
    }));
    let report = validator.validate_response(op, &drifted);
    assert!(!report.is_valid());
    assert!(report.violations.iter().any(|v| v.location == "body/status"));
}

#[test]
fn contract_converts_to_swagger_2() {
    let doc = OpenApiParser::parse_yaml(CONTRACT).unwrap();
    let swagger = SwaggerConverter::new(&doc).convert();

    assert_eq!(swagger["swagger"], "2.0");
    assert_eq!(swagger["basePath"], "/api/v1");
    assert_eq!(
        swagger["paths"]["/pdf/{docId}/"]["get"]["responses"]["200"]["schema"],
        json!({"type": "file"})
    );
}
