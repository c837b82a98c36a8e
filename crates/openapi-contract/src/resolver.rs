//! `$ref` resolution for OpenAPI documents

use serde::Serialize;
use serde_json::Value;

use crate::error::{ContractError, ContractResult};

/// Resolves local `$ref` references (`#/...` JSON pointers) against a document
#[derive(Debug, Clone, Copy)]
pub struct SchemaResolver<'a> {
    /// Document root the pointers are evaluated against
    document: &'a Value,
    /// Maximum number of references followed along one branch
    max_depth: usize,
}

/// A `$ref` found in the document, with the location that holds it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceSite {
    /// JSON pointer of the object containing the `$ref`
    pub pointer: String,
    /// The reference string itself
    pub reference: String,
}

impl<'a> SchemaResolver<'a> {
    /// Create a new resolver over a document root
    pub fn new(document: &'a Value) -> Self {
        Self {
            document,
            max_depth: 10,
        }
    }

    /// The document root
    pub fn document(&self) -> &'a Value {
        self.document
    }

    /// Whether a reference points inside the current document
    pub fn is_local(reference: &str) -> bool {
        reference.starts_with('#')
    }

    /// Look up the target of a local reference
    pub fn lookup(&self, reference: &str) -> Option<&'a Value> {
        let pointer = reference.strip_prefix('#')?;
        if pointer.is_empty() {
            return Some(self.document);
        }
        self.document.pointer(pointer)
    }

    /// Follow a chain of `$ref`s until a non-reference value is reached
    pub fn follow(&self, value: &'a Value) -> ContractResult<&'a Value> {
        let mut current = value;
        for _ in 0..=self.max_depth {
            match reference_of(current) {
                Some(reference) => {
                    current = self
                        .lookup(reference)
                        .ok_or_else(|| ContractError::UnresolvedReference(reference.to_string()))?;
                }
                None => return Ok(current),
            }
        }
        Err(ContractError::UnresolvedReference(format!(
            "reference chain deeper than {} at {}",
            self.max_depth,
            reference_of(current).unwrap_or_default()
        )))
    }

    /// Resolve a schema, inlining `$ref` targets.
    ///
    /// Cyclic schemas are cut off after `max_depth` references; the
    /// remaining `$ref` is left in place.
    pub fn resolve(&self, schema: &Value) -> Value {
        self.resolve_with_depth(schema, 0)
    }

    fn resolve_with_depth(&self, schema: &Value, depth: usize) -> Value {
        match schema {
            Value::Object(obj) => {
                if let Some(reference) = reference_of(schema) {
                    if depth >= self.max_depth {
                        return schema.clone();
                    }
                    if let Some(target) = self.lookup(reference) {
                        return self.resolve_with_depth(target, depth + 1);
                    }
                    return schema.clone();
                }

                let mut result = serde_json::Map::new();
                for (key, value) in obj {
                    result.insert(key.clone(), self.resolve_with_depth(value, depth));
                }
                Value::Object(result)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_with_depth(item, depth))
                    .collect(),
            ),
            _ => schema.clone(),
        }
    }

    /// Enumerate every `$ref` under `value`, in document order
    pub fn collect_refs(value: &Value) -> Vec<ReferenceSite> {
        let mut sites = Vec::new();
        collect_into(value, &mut String::new(), &mut sites);
        sites
    }
}

/// The `$ref` string of an object, if it is a reference object
pub fn reference_of(value: &Value) -> Option<&str> {
    value.get("$ref").and_then(Value::as_str)
}

/// Escape a key for use as a JSON pointer segment
pub fn escape_pointer_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn collect_into(value: &Value, pointer: &mut String, sites: &mut Vec<ReferenceSite>) {
    match value {
        Value::Object(obj) => {
            if let Some(Value::String(reference)) = obj.get("$ref") {
                sites.push(ReferenceSite {
                    pointer: pointer.clone(),
                    reference: reference.clone(),
                });
            }
            for (key, child) in obj {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&escape_pointer_segment(key));
                collect_into(child, pointer, sites);
                pointer.truncate(len);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&index.to_string());
                collect_into(child, pointer, sites);
                pointer.truncate(len);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "components": {
                "schemas": {
                    "Signer": {
                        "type": "object",
                        "properties": {
                            "email": {"type": "string"},
                            "document": {"$ref": "#/components/schemas/Document"}
                        }
                    },
                    "Document": {
                        "type": "object",
                        "properties": {
                            "uuid": {"type": "string"},
                            "signers": {
                                "type": "array",
                                "items": {"$ref": "#/components/schemas/Signer"}
                            }
                        }
                    },
                    "DocumentAlias": {"$ref": "#/components/schemas/Document"}
                },
                "parameters": {
                    "DocId": {"name": "docId", "in": "path", "required": true}
                }
            },
            "paths": {
                "/document/{docId}/": {
                    "get": {"parameters": [{"$ref": "#/components/parameters/DocId"}]}
                }
            }
        })
    }

    #[test]
    fn test_lookup_any_component_section() {
        let doc = document();
        let resolver = SchemaResolver::new(&doc);

        let param = resolver.lookup("#/components/parameters/DocId").unwrap();
        assert_eq!(param["name"], "docId");
        assert!(resolver.lookup("#/components/parameters/Missing").is_none());
        assert!(resolver.lookup("other.yaml#/Foo").is_none());
    }

    #[test]
    fn test_lookup_escaped_path_pointer() {
        let doc = document();
        let resolver = SchemaResolver::new(&doc);

        let item = resolver.lookup("#/paths/~1document~1{docId}~1").unwrap();
        assert!(item.get("get").is_some());
    }

    #[test]
    fn test_follow_chain() {
        let doc = document();
        let resolver = SchemaResolver::new(&doc);

        let alias = json!({"$ref": "#/components/schemas/DocumentAlias"});
        let target = resolver.follow(&alias).unwrap();
        assert_eq!(target["type"], "object");
        assert!(target["properties"].get("uuid").is_some());

        let dangling = json!({"$ref": "#/components/schemas/Nope"});
        assert!(matches!(
            resolver.follow(&dangling),
            Err(ContractError::UnresolvedReference(_))
        ));
    }

    #[test]
    fn test_resolve_cyclic_schema_terminates() {
        let doc = document();
        let resolver = SchemaResolver::new(&doc);

        let resolved = resolver.resolve(&json!({"$ref": "#/components/schemas/Signer"}));
        assert_eq!(resolved["properties"]["document"]["type"], "object");
        assert_eq!(
            resolved["properties"]["document"]["properties"]["signers"]["items"]["type"],
            "object"
        );
    }

    #[test]
    fn test_collect_refs_reports_sites() {
        let doc = document();
        let sites = SchemaResolver::collect_refs(&doc);

        assert!(sites.contains(&ReferenceSite {
            pointer: "/components/schemas/Document/properties/signers/items".to_string(),
            reference: "#/components/schemas/Signer".to_string(),
        }));
        assert!(sites.contains(&ReferenceSite {
            pointer: "/paths/~1document~1{docId}~1/get/parameters/0".to_string(),
            reference: "#/components/parameters/DocId".to_string(),
        }));
        assert_eq!(sites.len(), 4);
    }
}
