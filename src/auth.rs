use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Session tokens are HS256 JWTs; `sub` carries the user id.
pub fn decode_session(token: &str, secret: &str) -> anyhow::Result<SessionClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 60;
    validation.validate_aud = false;

    let data = decode::<SessionClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

/// The authenticated user behind a request, if any. Missing, malformed and
/// expired tokens all resolve to `None`.
pub fn principal_from_headers(headers: &HeaderMap, secret: &str) -> Option<Uuid> {
    let token = headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))?;

    match decode_session(token.trim(), secret) {
        Ok(claims) => Uuid::parse_str(&claims.sub).ok(),
        Err(err) => {
            tracing::debug!(error = %err, "rejecting session token");
            None
        }
    }
}
