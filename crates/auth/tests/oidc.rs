use std::time::Duration;

use http::HeaderMap;
use http::header;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use todo_auth::{OidcConfig, OidcVerifier};

fn verifier_config(jwks_json: &str) -> OidcConfig {
    OidcConfig {
        issuer: "https://issuer.example".to_string(),
        audience: Some("todo-service".to_string()),
        jwks_url: None,
        jwks_json: Some(jwks_json.to_string()),
        jwks_timeout: Duration::from_millis(2000),
        jwks_refresh_ttl: Duration::from_secs(300),
        clock_skew: Duration::from_secs(0),
        user_id_claim: "sub".to_string(),
    }
}

fn signed_token(claims: &serde_json::Value) -> String {
    let private_key_pem = include_bytes!("fixtures/test_rsa_private.pem");

    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("test-kid".to_string());

    encode(
        &header,
        claims,
        &EncodingKey::from_rsa_pem(private_key_pem).expect("private key must parse"),
    )
    .expect("token encode should succeed")
}

fn bearer_headers(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        format!("Bearer {}", token)
            .parse()
            .expect("authorization header must parse"),
    );
    headers
}

#[tokio::test]
async fn verify_extracts_user_id_from_valid_rs256_token() {
    let jwks_json = include_str!("fixtures/test_jwks.json");

    let token = signed_token(&serde_json::json!({
        "iss": "https://issuer.example",
        "sub": "u-alice",
        "aud": "todo-service",
        "exp": 2000000000,
        "iat": 1000000000,
    }));

    let verifier = OidcVerifier::new(verifier_config(jwks_json))
        .await
        .expect("verifier init should succeed");

    let identity = verifier
        .verify(&bearer_headers(&token))
        .await
        .expect("verify should succeed");

    assert_eq!(identity.user_id, "u-alice");
}

#[tokio::test]
async fn verify_rejects_expired_token() {
    let jwks_json = include_str!("fixtures/test_jwks.json");

    let token = signed_token(&serde_json::json!({
        "iss": "https://issuer.example",
        "sub": "u-alice",
        "aud": "todo-service",
        "exp": 1000000001,
        "iat": 1000000000,
    }));

    let verifier = OidcVerifier::new(verifier_config(jwks_json))
        .await
        .expect("verifier init should succeed");

    let err = verifier
        .verify(&bearer_headers(&token))
        .await
        .expect_err("expired token must be rejected");
    assert_eq!(err.code, "ERR_AUTH_INVALID");
}

#[tokio::test]
async fn verify_rejects_wrong_issuer() {
    let jwks_json = include_str!("fixtures/test_jwks.json");

    let token = signed_token(&serde_json::json!({
        "iss": "https://other.example",
        "sub": "u-alice",
        "aud": "todo-service",
        "exp": 2000000000,
        "iat": 1000000000,
    }));

    let verifier = OidcVerifier::new(verifier_config(jwks_json))
        .await
        .expect("verifier init should succeed");

    let err = verifier
        .verify(&bearer_headers(&token))
        .await
        .expect_err("wrong issuer must be rejected");
    assert_eq!(err.code, "ERR_AUTH_INVALID");
}

#[tokio::test]
async fn verify_rejects_garbage_token() {
    let jwks_json = include_str!("fixtures/test_jwks.json");

    let verifier = OidcVerifier::new(verifier_config(jwks_json))
        .await
        .expect("verifier init should succeed");

    let err = verifier
        .verify(&bearer_headers("not-a-jwt"))
        .await
        .expect_err("garbage token must be rejected");
    assert_eq!(err.code, "ERR_AUTH_INVALID");
}
