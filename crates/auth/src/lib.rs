use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::HeaderMap;
use http::header;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::Value;
use tokio::sync::RwLock;

pub mod session;

pub use session::{SessionEvent, SessionState, Subscription};

/// The stable identity a verified bearer credential resolves to.
/// Every ownership check downstream compares against `user_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub issuer: String,
    pub audience: Option<String>,
    pub jwks_url: Option<String>,
    pub jwks_json: Option<String>,
    pub jwks_timeout: Duration,
    pub jwks_refresh_ttl: Duration,
    pub clock_skew: Duration,
    pub user_id_claim: String,
}

#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

/// Verifies RS256 ID tokens against a JWKS document, refreshed on a
/// TTL when an unknown key id shows up.
#[derive(Clone)]
pub struct OidcVerifier {
    config: OidcConfig,
    http: reqwest::Client,
    jwks: Arc<RwLock<JwksCache>>,
}

#[derive(Debug)]
struct JwksCache {
    jwks: Option<JwkSet>,
    fetched_at: Option<Instant>,
}

impl OidcVerifier {
    pub async fn new(config: OidcConfig) -> Result<Self, AuthError> {
        if config.issuer.trim().is_empty() {
            return Err(AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "oidc issuer must be non-empty".to_string(),
            });
        }

        if config.user_id_claim.trim().is_empty() {
            return Err(AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "oidc user_id_claim must be non-empty".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.jwks_timeout)
            .build()
            .map_err(|_| AuthError {
                code: "ERR_INTERNAL",
                message: "failed to initialize oidc http client".to_string(),
            })?;

        let mut cache = JwksCache {
            jwks: None,
            fetched_at: None,
        };
        cache.refresh(&http, &config).await?;

        Ok(Self {
            config,
            http,
            jwks: Arc::new(RwLock::new(cache)),
        })
    }

    /// Resolves the caller's identity from the `Authorization` header,
    /// or explains why the credential was rejected.
    pub async fn verify(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let token = bearer_token(headers)?;

        let header = decode_header(&token).map_err(|_| AuthError {
            code: "ERR_AUTH_INVALID",
            message: "invalid ID token header".to_string(),
        })?;

        if header.alg != Algorithm::RS256 {
            return Err(AuthError {
                code: "ERR_AUTH_INVALID",
                message: "unsupported ID token alg (expected RS256)".to_string(),
            });
        }

        let kid = header.kid.ok_or_else(|| AuthError {
            code: "ERR_AUTH_INVALID",
            message: "ID token header missing kid".to_string(),
        })?;

        let decoding_key = self.decoding_key_for_kid(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(std::slice::from_ref(&self.config.issuer));
        if let Some(audience) = self.config.audience.as_ref() {
            validation.set_audience(std::slice::from_ref(audience));
        }
        validation.leeway = self.config.clock_skew.as_secs();

        let decoded =
            decode::<Value>(&token, &decoding_key, &validation).map_err(|_| AuthError {
                code: "ERR_AUTH_INVALID",
                message: "ID token validation failed".to_string(),
            })?;

        let user_id = claim_string(&decoded.claims, &self.config.user_id_claim)?;

        Ok(Identity { user_id })
    }

    async fn decoding_key_for_kid(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        {
            let cache = self.jwks.read().await;
            if let Some(jwk) = cache.jwk_for_kid(kid) {
                return DecodingKey::from_jwk(jwk).map_err(|_| AuthError {
                    code: "ERR_AUTH_INVALID",
                    message: "failed to parse JWK decoding key".to_string(),
                });
            }
        }

        {
            let mut cache = self.jwks.write().await;
            let refresh_needed = cache
                .fetched_at
                .map(|t| t.elapsed() > self.config.jwks_refresh_ttl)
                .unwrap_or(true);
            if refresh_needed {
                cache.refresh(&self.http, &self.config).await?;
            }

            if let Some(jwk) = cache.jwk_for_kid(kid) {
                return DecodingKey::from_jwk(jwk).map_err(|_| AuthError {
                    code: "ERR_AUTH_INVALID",
                    message: "failed to parse JWK decoding key".to_string(),
                });
            }
        }

        Err(AuthError {
            code: "ERR_AUTH_INVALID",
            message: "ID token kid not found in JWKS".to_string(),
        })
    }
}

impl JwksCache {
    fn jwk_for_kid(&self, kid: &str) -> Option<&jsonwebtoken::jwk::Jwk> {
        self.jwks.as_ref()?.find(kid)
    }

    async fn refresh(
        &mut self,
        http: &reqwest::Client,
        config: &OidcConfig,
    ) -> Result<(), AuthError> {
        let jwks = if let Some(jwks_json) = config.jwks_json.as_ref() {
            serde_json::from_str::<JwkSet>(jwks_json).map_err(|_| AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "TODO_OIDC_JWKS_JSON is not valid JWKS JSON".to_string(),
            })?
        } else if let Some(url) = config.jwks_url.as_ref() {
            http.get(url)
                .send()
                .await
                .map_err(|_| AuthError {
                    code: "ERR_AUTH_UNAVAILABLE",
                    message: "failed to fetch JWKS".to_string(),
                })?
                .error_for_status()
                .map_err(|_| AuthError {
                    code: "ERR_AUTH_UNAVAILABLE",
                    message: "JWKS endpoint returned non-success status".to_string(),
                })?
                .json::<JwkSet>()
                .await
                .map_err(|_| AuthError {
                    code: "ERR_AUTH_UNAVAILABLE",
                    message: "failed to parse JWKS JSON".to_string(),
                })?
        } else {
            return Err(AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "oidc requires jwks_url or jwks_json".to_string(),
            });
        };

        self.jwks = Some(jwks);
        self.fetched_at = Some(Instant::now());
        Ok(())
    }
}

/// Fixed token-to-user map for development and tests. Stands in for
/// the identity provider without changing the bearer contract.
#[derive(Debug, Clone)]
pub struct StaticTokenSet {
    tokens: HashMap<String, String>,
}

impl StaticTokenSet {
    /// Parses `token=user` pairs separated by commas.
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let mut tokens = HashMap::new();

        for pair in raw.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let Some((token, user_id)) = pair.split_once('=') else {
                return Err(AuthError {
                    code: "ERR_INVALID_CONFIG",
                    message: "static tokens must be comma-separated token=user pairs".to_string(),
                });
            };
            let token = token.trim();
            let user_id = user_id.trim();
            if token.is_empty() || user_id.is_empty() {
                return Err(AuthError {
                    code: "ERR_INVALID_CONFIG",
                    message: "static token pairs must have non-empty token and user".to_string(),
                });
            }
            tokens.insert(token.to_string(), user_id.to_string());
        }

        if tokens.is_empty() {
            return Err(AuthError {
                code: "ERR_INVALID_CONFIG",
                message: "static token set must contain at least one pair".to_string(),
            });
        }

        Ok(Self { tokens })
    }

    pub fn verify(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let token = bearer_token(headers)?;
        let user_id = self.tokens.get(&token).ok_or_else(|| AuthError {
            code: "ERR_AUTH_INVALID",
            message: "unknown bearer token".to_string(),
        })?;

        Ok(Identity {
            user_id: user_id.clone(),
        })
    }
}

/// Pulls the opaque credential out of `Authorization: Bearer <token>`.
/// A missing header and a malformed one are distinct failures so the
/// transport can log them apart; both map to 401.
pub fn bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let authz = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError {
            code: "ERR_AUTH_REQUIRED",
            message: "missing Authorization header".to_string(),
        })?;

    let token = authz
        .strip_prefix("Bearer ")
        .or_else(|| authz.strip_prefix("bearer "))
        .ok_or_else(|| AuthError {
            code: "ERR_AUTH_INVALID",
            message: "Authorization must be a Bearer token".to_string(),
        })?;

    if token.trim().is_empty() {
        return Err(AuthError {
            code: "ERR_AUTH_INVALID",
            message: "Bearer token is empty".to_string(),
        });
    }

    Ok(token.to_string())
}

fn claim_string(claims: &Value, claim: &str) -> Result<String, AuthError> {
    claims
        .get(claim)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| AuthError {
            code: "ERR_AUTH_INVALID",
            message: format!("required claim `{}` is missing or not a string", claim),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_authorization(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            value.parse().expect("authorization header must parse"),
        );
        headers
    }

    #[test]
    fn bearer_token_rejects_missing_header() {
        let headers = HeaderMap::new();
        let err = bearer_token(&headers).unwrap_err();
        assert_eq!(err.code, "ERR_AUTH_REQUIRED");
    }

    #[test]
    fn bearer_token_rejects_non_bearer_scheme() {
        let headers = headers_with_authorization("Basic dXNlcjpwYXNz");
        let err = bearer_token(&headers).unwrap_err();
        assert_eq!(err.code, "ERR_AUTH_INVALID");
    }

    #[test]
    fn bearer_token_rejects_empty_token() {
        let headers = headers_with_authorization("Bearer   ");
        let err = bearer_token(&headers).unwrap_err();
        assert_eq!(err.code, "ERR_AUTH_INVALID");
    }

    #[test]
    fn bearer_token_extracts_token() {
        let headers = headers_with_authorization("Bearer abc123");
        assert_eq!(bearer_token(&headers).unwrap(), "abc123");
    }

    #[test]
    fn static_token_set_resolves_known_tokens() {
        let tokens = StaticTokenSet::parse("t1=alice, t2=bob").expect("pairs should parse");

        let identity = tokens
            .verify(&headers_with_authorization("Bearer t2"))
            .expect("known token should verify");
        assert_eq!(identity.user_id, "bob");

        let err = tokens
            .verify(&headers_with_authorization("Bearer nope"))
            .unwrap_err();
        assert_eq!(err.code, "ERR_AUTH_INVALID");
    }

    #[test]
    fn static_token_set_rejects_malformed_pairs() {
        assert_eq!(
            StaticTokenSet::parse("").unwrap_err().code,
            "ERR_INVALID_CONFIG"
        );
        assert_eq!(
            StaticTokenSet::parse("justatoken").unwrap_err().code,
            "ERR_INVALID_CONFIG"
        );
        assert_eq!(
            StaticTokenSet::parse("=alice").unwrap_err().code,
            "ERR_INVALID_CONFIG"
        );
    }

    #[test]
    fn claim_string_requires_nonempty_string() {
        let claims = serde_json::json!({"sub": "u1", "blank": "  ", "num": 7});
        assert_eq!(claim_string(&claims, "sub").unwrap(), "u1");
        assert_eq!(
            claim_string(&claims, "blank").unwrap_err().code,
            "ERR_AUTH_INVALID"
        );
        assert_eq!(
            claim_string(&claims, "num").unwrap_err().code,
            "ERR_AUTH_INVALID"
        );
        assert_eq!(
            claim_string(&claims, "missing").unwrap_err().code,
            "ERR_AUTH_INVALID"
        );
    }
}
