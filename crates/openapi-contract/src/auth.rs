//! Authentication scheme detection and credential placement

use indexmap::IndexMap;

use crate::types::*;

/// Detected authentication scheme for an operation
#[derive(Debug, Clone, PartialEq)]
pub enum AuthScheme {
    /// No authentication required
    None,
    /// Bearer token (Authorization: Bearer <token>)
    Bearer { format: Option<String> },
    /// API key in header, query, or cookie
    ApiKey {
        name: String,
        location: ApiKeyLocation,
    },
    /// Basic authentication
    Basic,
    /// OAuth2 authentication
    OAuth2 {
        authorization_url: Option<String>,
        token_url: Option<String>,
        scopes: Vec<String>,
    },
    /// Multiple auth schemes (any of)
    Multiple(Vec<AuthScheme>),
}

/// Where a credential ends up on the outgoing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialPlacement {
    Header { name: String, value: String },
    Query { name: String, value: String },
    Cookie { name: String, value: String },
}

impl AuthScheme {
    /// Detect the authentication scheme from an operation's effective requirements.
    ///
    /// An empty requirement list means the operation is anonymous, even when
    /// the document defines schemes.
    pub fn detect(
        security_schemes: &IndexMap<String, SecurityScheme>,
        security_requirements: &[SecurityRequirement],
    ) -> Self {
        let mut schemes: Vec<AuthScheme> = Vec::new();

        for req in security_requirements {
            if let Some(scheme) = security_schemes.get(&req.scheme_name) {
                let mut auth = Self::from_scheme(scheme);

                if let AuthScheme::OAuth2 { ref mut scopes, .. } = auth {
                    *scopes = req.scopes.clone();
                }

                schemes.push(auth);
            }
        }

        match schemes.len() {
            0 => AuthScheme::None,
            1 => schemes.remove(0),
            _ => AuthScheme::Multiple(schemes),
        }
    }

    /// Detect the scheme for one operation of a contract
    pub fn for_operation(spec: &ContractSpec, operation: &ApiOperation) -> Self {
        Self::detect(&spec.security_schemes, &operation.security)
    }

    fn from_scheme(scheme: &SecurityScheme) -> Self {
        match scheme {
            SecurityScheme::ApiKey { name, location } => AuthScheme::ApiKey {
                name: name.clone(),
                location: *location,
            },
            SecurityScheme::Http {
                scheme,
                bearer_format,
            } => match scheme.to_lowercase().as_str() {
                "basic" => AuthScheme::Basic,
                _ => AuthScheme::Bearer {
                    format: bearer_format.clone(),
                },
            },
            SecurityScheme::OAuth2 { flows } => {
                // Prefer authorization_code flow
                let (auth_url, token_url) = if let Some(flow) = &flows.authorization_code {
                    (flow.authorization_url.clone(), flow.token_url.clone())
                } else if let Some(flow) = &flows.client_credentials {
                    (None, flow.token_url.clone())
                } else if let Some(flow) = &flows.implicit {
                    (flow.authorization_url.clone(), None)
                } else if let Some(flow) = &flows.password {
                    (None, flow.token_url.clone())
                } else {
                    (None, None)
                };

                AuthScheme::OAuth2 {
                    authorization_url: auth_url,
                    token_url,
                    scopes: Vec::new(),
                }
            }
            SecurityScheme::OpenIdConnect { openid_connect_url } => AuthScheme::OAuth2 {
                authorization_url: Some(openid_connect_url.clone()),
                token_url: None,
                scopes: Vec::new(),
            },
        }
    }

    /// Whether a credential is needed at all
    pub fn requires_credential(&self) -> bool {
        !matches!(self, AuthScheme::None)
    }

    /// Place a credential on the request.
    ///
    /// For [`AuthScheme::Multiple`] the first alternative is used. API keys
    /// are sent verbatim, so a vendor prefix (e.g. `ApiKey user:secret`) is
    /// part of the credential.
    pub fn place(&self, credential: &str) -> Option<CredentialPlacement> {
        match self {
            AuthScheme::None => None,
            AuthScheme::Bearer { .. } | AuthScheme::OAuth2 { .. } => {
                Some(CredentialPlacement::Header {
                    name: "Authorization".to_string(),
                    value: format!("Bearer {}", credential),
                })
            }
            AuthScheme::Basic => Some(CredentialPlacement::Header {
                name: "Authorization".to_string(),
                value: format!("Basic {}", credential),
            }),
            AuthScheme::ApiKey { name, location } => {
                let name = name.clone();
                let value = credential.to_string();
                Some(match location {
                    ApiKeyLocation::Header => CredentialPlacement::Header { name, value },
                    ApiKeyLocation::Query => CredentialPlacement::Query { name, value },
                    ApiKeyLocation::Cookie => CredentialPlacement::Cookie { name, value },
                })
            }
            AuthScheme::Multiple(schemes) => schemes.first().and_then(|s| s.place(credential)),
        }
    }

    /// Get the header name for this auth scheme
    pub fn header_name(&self) -> Option<&str> {
        match self {
            AuthScheme::Bearer { .. } | AuthScheme::Basic | AuthScheme::OAuth2 { .. } => {
                Some("Authorization")
            }
            AuthScheme::ApiKey {
                name,
                location: ApiKeyLocation::Header,
            } => Some(name.as_str()),
            AuthScheme::Multiple(schemes) => schemes.first().and_then(|s| s.header_name()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement(name: &str) -> Vec<SecurityRequirement> {
        vec![SecurityRequirement {
            scheme_name: name.to_string(),
            scopes: vec![],
        }]
    }

    #[test]
    fn test_detect_api_key() {
        let mut schemes = IndexMap::new();
        schemes.insert(
            "apiKeyAuth".to_string(),
            SecurityScheme::ApiKey {
                name: "Authorization".to_string(),
                location: ApiKeyLocation::Header,
            },
        );

        let auth = AuthScheme::detect(&schemes, &requirement("apiKeyAuth"));

        assert_eq!(
            auth,
            AuthScheme::ApiKey {
                name: "Authorization".to_string(),
                location: ApiKeyLocation::Header
            }
        );
        assert_eq!(auth.header_name(), Some("Authorization"));
    }

    #[test]
    fn test_detect_bearer() {
        let mut schemes = IndexMap::new();
        schemes.insert(
            "bearerAuth".to_string(),
            SecurityScheme::Http {
                scheme: "bearer".to_string(),
                bearer_format: Some("JWT".to_string()),
            },
        );

        let auth = AuthScheme::detect(&schemes, &requirement("bearerAuth"));

        assert_eq!(
            auth,
            AuthScheme::Bearer {
                format: Some("JWT".to_string())
            }
        );
    }

    #[test]
    fn test_no_requirements_is_anonymous() {
        let mut schemes = IndexMap::new();
        schemes.insert(
            "apiKeyAuth".to_string(),
            SecurityScheme::ApiKey {
                name: "X-Api-Key".to_string(),
                location: ApiKeyLocation::Header,
            },
        );

        let auth = AuthScheme::detect(&schemes, &[]);
        assert_eq!(auth, AuthScheme::None);
        assert!(!auth.requires_credential());
        assert!(auth.place("secret").is_none());
    }

    #[test]
    fn test_place_api_key_verbatim() {
        let header = AuthScheme::ApiKey {
            name: "Authorization".to_string(),
            location: ApiKeyLocation::Header,
        };
        assert_eq!(
            header.place("ApiKey jane:abc123"),
            Some(CredentialPlacement::Header {
                name: "Authorization".to_string(),
                value: "ApiKey jane:abc123".to_string()
            })
        );

        let query = AuthScheme::ApiKey {
            name: "api_key".to_string(),
            location: ApiKeyLocation::Query,
        };
        assert_eq!(
            query.place("abc"),
            Some(CredentialPlacement::Query {
                name: "api_key".to_string(),
                value: "abc".to_string()
            })
        );
    }

    #[test]
    fn test_place_bearer() {
        let auth = AuthScheme::Bearer { format: None };
        assert_eq!(
            auth.place("my-token"),
            Some(CredentialPlacement::Header {
                name: "Authorization".to_string(),
                value: "Bearer my-token".to_string()
            })
        );
    }
}
