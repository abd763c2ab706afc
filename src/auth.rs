use axum::{
    body::{Body, to_bytes},
    extract::{FromRef, FromRequestParts, Query, Request},
    http::{header, request::Parts},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};

use crate::{
    config::{AppConfig, Env},
    error::ApiError,
    models::User,
    policy::{Actor, Role},
    repository::RepositoryState,
};

/// Claims
///
/// Payload of the HS256 tokens the service accepts. Tokens are issued elsewhere;
/// `issue_token` exists for tests and local tooling.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: i64,
    pub exp: usize,
    pub iat: usize,
}

/// Signs a token for `user_id` that expires `ttl_secs` from now. A negative
/// ttl yields an already expired token.
pub fn issue_token(
    secret: &str,
    user_id: i64,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        exp: (now + ttl_secs).max(0) as usize,
        iat: now.max(0) as usize,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Decodes and validates a token (signature and expiry).
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, AuthFailure> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AuthFailure::Rejected("Authentication token has expired"),
        _ => AuthFailure::Rejected("Invalid authentication token"),
    })
}

/// AuthFailure
///
/// Why a request could not be tied to a user. Each route family decides which
/// status these become.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("No authentication token provided")]
    Missing,
    #[error("{0}")]
    Rejected(&'static str),
    /// The user lookup itself failed.
    #[error("user lookup failed: {0}")]
    Unavailable(String),
}

impl AuthFailure {
    /// `/api` convention: every credential failure is a rejected token (419).
    pub fn into_token_rejection(self) -> ApiError {
        match self {
            AuthFailure::Unavailable(detail) => ApiError::Internal(detail),
            other => ApiError::TokenRejected(other.to_string()),
        }
    }

    /// Assessment routes: every credential failure is a plain 401.
    pub fn into_unauthenticated(self) -> ApiError {
        match self {
            AuthFailure::Unavailable(detail) => ApiError::Internal(detail),
            other => ApiError::Unauthenticated(other.to_string()),
        }
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> Response {
        self.into_unauthenticated().into_response()
    }
}

/// AuthUser
///
/// The resolved identity of a request. `role` is the system-wide role; unit
/// membership is looked up per request by the handlers.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub role: String,
}

impl AuthUser {
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id,
            role: Role::parse(&self.role),
        }
    }
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role: user.role,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    auth_token: Option<String>,
}

/// Token read from a top-level `auth_token` field of a JSON request body.
#[derive(Debug, Clone)]
pub struct BodyToken(pub String);

#[derive(Debug, Deserialize)]
struct TokenBody {
    auth_token: Option<String>,
}

/// Largest JSON body searched for an `auth_token` field.
const BODY_TOKEN_LIMIT: usize = 2 * 1024 * 1024;

fn has_json_body(parts: &Parts) -> bool {
    parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().starts_with("application/json"))
}

/// attach_body_token
///
/// For JSON requests that carry no header or query credential, buffers the body
/// and stores its top-level `auth_token` (if any) as a `BodyToken` extension.
/// The request is rebuilt from the buffered bytes so handlers still read it.
pub async fn attach_body_token(request: Request) -> Result<Request, ApiError> {
    let (mut parts, body) = request.into_parts();
    if extract_token(&parts).is_some() || !has_json_body(&parts) {
        return Ok(Request::from_parts(parts, body));
    }

    let bytes = to_bytes(body, BODY_TOKEN_LIMIT)
        .await
        .map_err(|e| ApiError::MalformedInput(format!("Unable to read request body: {e}")))?;
    if let Ok(TokenBody {
        auth_token: Some(token),
    }) = serde_json::from_slice::<TokenBody>(&bytes)
    {
        parts.extensions.insert(BodyToken(token));
    }

    Ok(Request::from_parts(parts, Body::from(bytes)))
}

/// extract_token
///
/// Looks for a token in, in order: `Authorization: Bearer`, the `Auth-Token`
/// header, the `auth_token` query parameter, then a `BodyToken` placed by
/// `attach_body_token`. A present-but-empty value is
/// returned as an empty string so it can be rejected rather than treated as missing.
fn extract_token(parts: &Parts) -> Option<String> {
    if let Some(value) = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        let token = value.strip_prefix("Bearer ").unwrap_or(value);
        return Some(token.trim().to_string());
    }

    if let Some(value) = parts.headers.get("auth-token").and_then(|v| v.to_str().ok()) {
        return Some(value.trim().to_string());
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(query)| query.auth_token)
        .or_else(|| parts.extensions.get::<BodyToken>().map(|t| t.0.clone()))
        .map(|token| token.trim().to_string())
}

/// AuthUser Extractor Implementation
///
/// Reuses an identity already placed in the request extensions by one of the
/// auth middlewares. Otherwise resolves it:
/// 1. Local bypass via the `x-user-id` header (only in `Env::Local`).
/// 2. Token extraction and JWT verification.
/// 3. User lookup, so tokens of deleted users stop working.
/// 4. Optional `Username` header must match the token's user.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AuthFailure;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        if config.env == Env::Local {
            let bypass_id = parts
                .headers
                .get("x-user-id")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok());
            if let Some(user_id) = bypass_id {
                let found = repo
                    .get_user(user_id)
                    .await
                    .map_err(|e| AuthFailure::Unavailable(e.to_string()))?;
                if let Some(user) = found {
                    return Ok(user.into());
                }
            }
        }

        let token = extract_token(parts).ok_or(AuthFailure::Missing)?;
        if token.is_empty() {
            return Err(AuthFailure::Rejected("Authentication token is empty"));
        }

        let claims = verify_token(&config.jwt_secret, &token)?;

        let user = repo
            .get_user(claims.sub)
            .await
            .map_err(|e| AuthFailure::Unavailable(e.to_string()))?
            .ok_or(AuthFailure::Rejected("Authentication token does not match a user"))?;

        let claimed_username = parts.headers.get("username").and_then(|v| v.to_str().ok());
        if let Some(username) = claimed_username {
            if username != user.username {
                tracing::warn!(user_id = user.id, "username header does not match token");
                return Err(AuthFailure::Rejected("Username does not match authentication token"));
            }
        }

        Ok(user.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_for(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn issued_tokens_verify_with_the_same_secret() {
        let token = issue_token("secret", 42, 3600).unwrap();
        assert_eq!(verify_token("secret", &token).unwrap().sub, 42);
        assert_eq!(
            verify_token("other", &token).unwrap_err(),
            AuthFailure::Rejected("Invalid authentication token")
        );
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let token = issue_token("secret", 42, -3600).unwrap();
        assert_eq!(
            verify_token("secret", &token).unwrap_err(),
            AuthFailure::Rejected("Authentication token has expired")
        );
    }

    #[test]
    fn token_sources_are_checked_in_order() {
        let bearer = parts_for(
            Request::builder()
                .uri("/api/tutorials?auth_token=query")
                .header("Authorization", "Bearer header")
                .body(())
                .unwrap(),
        );
        assert_eq!(extract_token(&bearer).as_deref(), Some("header"));

        let auth_token = parts_for(
            Request::builder()
                .uri("/savetests")
                .header("Auth-Token", "abc")
                .body(())
                .unwrap(),
        );
        assert_eq!(extract_token(&auth_token).as_deref(), Some("abc"));

        let query = parts_for(
            Request::builder()
                .uri("/savetests?task_id=1&auth_token=xyz")
                .body(())
                .unwrap(),
        );
        assert_eq!(extract_token(&query).as_deref(), Some("xyz"));

        let none = parts_for(Request::builder().uri("/savetests").body(()).unwrap());
        assert_eq!(extract_token(&none), None);
    }

    #[test]
    fn body_token_is_the_last_resort() {
        let mut parts = parts_for(Request::builder().uri("/api/tutorials").body(()).unwrap());
        parts.extensions.insert(BodyToken(" from-body ".to_string()));
        assert_eq!(extract_token(&parts).as_deref(), Some("from-body"));

        let mut parts = parts_for(
            Request::builder()
                .uri("/api/tutorials?auth_token=query")
                .body(())
                .unwrap(),
        );
        parts.extensions.insert(BodyToken("from-body".to_string()));
        assert_eq!(extract_token(&parts).as_deref(), Some("query"));
    }

    #[tokio::test]
    async fn json_bodies_keep_their_content_after_the_token_is_read() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/tutorials")
            .header("Content-Type", "application/json")
            .body(Body::from(r#"{"tutorial":{},"auth_token":"abc"}"#))
            .unwrap();

        let request = attach_body_token(request).await.unwrap();
        assert_eq!(
            request.extensions().get::<BodyToken>().map(|t| t.0.as_str()),
            Some("abc")
        );
        let bytes = to_bytes(request.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], br#"{"tutorial":{},"auth_token":"abc"}"#);
    }

    #[tokio::test]
    async fn bodies_are_left_alone_when_a_header_token_exists() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/tutorials")
            .header("Content-Type", "application/json")
            .header("Auth-Token", "header")
            .body(Body::from(r#"{"auth_token":"body"}"#))
            .unwrap();

        let request = attach_body_token(request).await.unwrap();
        assert!(request.extensions().get::<BodyToken>().is_none());
    }

    #[test]
    fn empty_bearer_is_present_but_empty() {
        let parts = parts_for(
            Request::builder()
                .uri("/api/tutorials")
                .header("Authorization", "Bearer ")
                .body(())
                .unwrap(),
        );
        assert_eq!(extract_token(&parts).as_deref(), Some(""));
    }

    #[test]
    fn route_families_map_failures_differently() {
        assert_eq!(AuthFailure::Missing.into_token_rejection().status().as_u16(), 419);
        assert_eq!(AuthFailure::Missing.into_unauthenticated().status().as_u16(), 401);
    }
}
