//! Client credentials: basic auth passed on to backends, and bearer tokens
//! identifying the user when authorization is required.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use moka::future::Cache;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::{AuthConfig, ValidationMethod};
use crate::errors::AuthError;
use crate::models::BasicAuth;

/// Credentials from an `Authorization: Basic` header.
///
/// A missing header, or one using another scheme, yields empty credentials.
pub(crate) fn parse_basic_auth(headers: &HeaderMap) -> Result<BasicAuth, AuthError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(BasicAuth::default());
    };
    let value = value.to_str().map_err(|e| AuthError::MalformedHeader {
        details: e.to_string(),
    })?;
    let Some(encoded) = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))
    else {
        return Ok(BasicAuth::default());
    };

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| AuthError::MalformedHeader {
            details: format!("invalid basic credentials encoding: {}", e),
        })?;
    let decoded = String::from_utf8(decoded).map_err(|e| AuthError::MalformedHeader {
        details: format!("basic credentials are not UTF-8: {}", e),
    })?;

    let (username, password) = match decoded.split_once(':') {
        Some((username, password)) => (username.to_string(), Some(password.to_string())),
        None => (decoded, None),
    };
    Ok(BasicAuth {
        username: Some(username),
        password,
    })
}

/// Token carried in the configured header after the configured prefix.
pub(crate) fn bearer_token(headers: &HeaderMap, config: &AuthConfig) -> Result<String, AuthError> {
    let value = headers
        .get(config.header_name.as_str())
        .ok_or_else(|| AuthError::MissingHeader {
            header: config.header_name.clone(),
        })?
        .to_str()
        .map_err(|e| AuthError::MalformedHeader {
            details: e.to_string(),
        })?;

    let token = if config.token_prefix.is_empty() {
        value
    } else {
        value
            .strip_prefix(config.token_prefix.as_str())
            .and_then(|rest| rest.strip_prefix(' '))
            .ok_or_else(|| AuthError::MalformedHeader {
                details: format!("expected '{} <token>'", config.token_prefix),
            })?
    };

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MalformedHeader {
            details: "empty token".to_string(),
        });
    }
    Ok(token.to_string())
}

/// Unverified claims of a JWT. Trust comes from the validation methods.
fn decode_claims(token: &str) -> Result<Value, AuthError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => {
            return Err(AuthError::TokenValidationFailed {
                details: "token is not a JWT".to_string(),
            });
        }
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::TokenValidationFailed {
            details: format!("invalid claims encoding: {}", e),
        })?;
    serde_json::from_slice(&bytes).map_err(|e| AuthError::TokenValidationFailed {
        details: format!("invalid claims: {}", e),
    })
}

fn string_claim(claims: &Value, name: &str) -> Result<String, AuthError> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AuthError::MissingClaim {
            claim: name.to_string(),
        })
}

#[derive(Debug, Deserialize)]
struct OpenIdConfiguration {
    userinfo_endpoint: Option<String>,
}

/// Validates bearer tokens against their issuer and caches the identity of
/// accepted tokens for a few minutes.
#[derive(Clone)]
pub struct TokenValidator {
    http_client: reqwest::Client,
    config: AuthConfig,
    accepted: Cache<String, String>,
}

impl TokenValidator {
    pub fn new(http_client: reqwest::Client, config: AuthConfig) -> Self {
        Self {
            http_client,
            config,
            accepted: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(300))
                .build(),
        }
    }

    /// Identity claim of a valid token.
    pub async fn validate(&self, token: &str) -> Result<String, AuthError> {
        if let Some(identity) = self.accepted.get(token).await {
            tracing::debug!("Token found in cache");
            return Ok(identity);
        }

        let claims = decode_claims(token)?;
        let issuer = string_claim(&claims, &self.config.claim_issuer)?;
        let identity = string_claim(&claims, &self.config.claim_identity)?;

        let required = self.config.required_validations();
        let mut passed = 0;
        let mut failures = Vec::new();
        for method in &self.config.validation_methods {
            let result = match method {
                ValidationMethod::Userinfo => self.validate_userinfo(&issuer, token).await,
            };
            match result {
                Ok(()) => passed += 1,
                Err(e) => {
                    tracing::debug!(?method, error = %e, "Token validation method failed");
                    failures.push(e.to_string());
                }
            }
            if passed >= required {
                break;
            }
        }

        if passed < required {
            return Err(AuthError::TokenValidationFailed {
                details: failures.join("; "),
            });
        }

        self.accepted.insert(token.to_string(), identity.clone()).await;
        tracing::debug!(identity = %identity, "Token validated");
        Ok(identity)
    }

    async fn validate_userinfo(&self, issuer: &str, token: &str) -> Result<(), AuthError> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        let discovery: OpenIdConfiguration = self
            .http_client
            .get(&discovery_url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| AuthError::TokenValidationFailed {
                details: format!("issuer discovery failed: {}", e),
            })?
            .json()
            .await
            .map_err(|e| AuthError::TokenValidationFailed {
                details: format!("invalid issuer configuration: {}", e),
            })?;

        let userinfo_url =
            discovery
                .userinfo_endpoint
                .ok_or_else(|| AuthError::TokenValidationFailed {
                    details: "issuer has no userinfo endpoint".to_string(),
                })?;

        self.http_client
            .get(&userinfo_url)
            .bearer_auth(token)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| AuthError::TokenValidationFailed {
                details: format!("userinfo request failed: {}", e),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token(claims: Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.signature")
    }

    #[test]
    fn test_parse_basic_auth() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_basic_auth(&headers).unwrap(), BasicAuth::default());

        // "alice:s3:cret"
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic YWxpY2U6czM6Y3JldA=="));
        let auth = parse_basic_auth(&headers).unwrap();
        assert_eq!(auth.username.as_deref(), Some("alice"));
        assert_eq!(auth.password.as_deref(), Some("s3:cret"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(parse_basic_auth(&headers).unwrap().is_empty());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic !!!"));
        assert!(matches!(
            parse_basic_auth(&headers),
            Err(AuthError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn test_bearer_token_extraction() {
        let config = AuthConfig::default();
        let mut headers = HeaderMap::new();
        assert!(matches!(
            bearer_token(&headers, &config),
            Err(AuthError::MissingHeader { .. })
        ));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers, &config).unwrap(), "abc.def.ghi");

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Token abc"));
        assert!(matches!(
            bearer_token(&headers, &config),
            Err(AuthError::MalformedHeader { .. })
        ));
    }

    #[tokio::test]
    async fn test_userinfo_validation() {
        let issuer = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "userinfo_endpoint": format!("{}/userinfo", issuer.uri())
            })))
            .mount(&issuer)
            .await;

        let good = token(json!({"iss": issuer.uri(), "sub": "user-1"}));
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", format!("Bearer {good}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sub": "user-1"})))
            .expect(1)
            .mount(&issuer)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&issuer)
            .await;

        let validator = TokenValidator::new(reqwest::Client::new(), AuthConfig::default());
        assert_eq!(validator.validate(&good).await.unwrap(), "user-1");
        // cached, userinfo is not asked again
        assert_eq!(validator.validate(&good).await.unwrap(), "user-1");

        let revoked = token(json!({"iss": issuer.uri(), "sub": "user-2"}));
        assert!(matches!(
            validator.validate(&revoked).await,
            Err(AuthError::TokenValidationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_claims() {
        let validator = TokenValidator::new(reqwest::Client::new(), AuthConfig::default());
        let no_subject = token(json!({"iss": "https://issuer.example.org"}));
        assert!(matches!(
            validator.validate(&no_subject).await,
            Err(AuthError::MissingClaim { ref claim }) if claim == "sub"
        ));
        assert!(matches!(
            validator.validate("not-a-jwt").await,
            Err(AuthError::TokenValidationFailed { .. })
        ));
    }
}
