//! Static bearer-token authentication.
//!
//! The scrape routes are protected by one configured secret. Callers present
//! it either as `Authorization: Bearer <token>` or as a `?token=` query
//! parameter. Missing token → 401, wrong token → 403, and both happen before
//! any browser work starts.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
};

use crate::api::ServiceResponse;

/// Proof that the request carried the configured token. Handlers take this
/// as an argument; the extractor rejects unauthenticated requests before the
/// handler body runs.
pub struct ApiToken;

pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "token").then(|| value.to_string())
    })
}

fn reject(status: StatusCode, message: &str) -> Response {
    ServiceResponse::<()>::failure(message, status).into_response()
}

#[async_trait]
impl<S> FromRequestParts<S> for ApiToken
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(extract_bearer_token)
            .map(str::to_string);

        let token = from_header
            .or_else(|| parts.uri.query().and_then(token_from_query))
            .ok_or_else(|| {
                reject(
                    StatusCode::UNAUTHORIZED,
                    "Token required. Provide it in Authorization header (Bearer token) or as query parameter (?token=...)",
                )
            })?;

        let secret = std::env::var("SCRAP_API_TOKEN").unwrap_or_default();
        if secret.is_empty() || token != secret {
            tracing::warn!("⚠️ Rejected request with invalid token");
            return Err(reject(StatusCode::FORBIDDEN, "Invalid token"));
        }

        Ok(ApiToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_prefix_is_stripped() {
        assert_eq!(extract_bearer_token("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer_token("Basic abc123"), None);
        assert_eq!(extract_bearer_token("abc123"), None);
    }

    #[test]
    fn token_query_parameter_is_found() {
        assert_eq!(token_from_query("token=s3cret"), Some("s3cret".to_string()));
        assert_eq!(token_from_query("page_id=42&token=s3cret"), Some("s3cret".to_string()));
        assert_eq!(token_from_query("page_id=42"), None);
    }
}
