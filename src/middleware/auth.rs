// src/middleware/auth.rs
use crate::error::AppError;
use crate::services::accounts;
use crate::AppState;
use axum::{
    extract::{Extension, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Claims carried by the identity provider's session token. Everything
/// beyond these fields is the provider's business.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    pub exp: usize,
    pub iat: usize,
}

pub fn verify_identity_token(token: &str) -> Result<IdentityClaims, jsonwebtoken::errors::Error> {
    let secret =
        std::env::var("IDENTITY_JWT_SECRET").unwrap_or_else(|_| "default_secret".to_string());

    let token_data = decode::<IdentityClaims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| AppError::Unauthorized("Invalid Authorization header format".to_string()))?;

    auth_str.strip_prefix("Bearer ").ok_or_else(|| {
        AppError::Unauthorized(
            "Invalid Authorization header format. Expected 'Bearer <token>'".to_string(),
        )
    })
}

/// Verifies the identity provider's token and provisions the local user
/// row, making it available to handlers via request extensions.
pub async fn auth_middleware(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&headers)?;

    let claims = verify_identity_token(token).map_err(|e| {
        tracing::warn!("Identity token verification failed: {}", e);
        AppError::Unauthorized("Invalid or expired token".to_string())
    })?;

    let user = accounts::provision_user(&state.db_pool, &claims).await?;
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Like auth_middleware, but anonymous or failed lookups pass through
/// without a user. For endpoints where authentication only enriches the
/// response.
pub async fn maybe_auth_middleware(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    if let Ok(token) = bearer_token(&headers) {
        match verify_identity_token(token) {
            Ok(claims) => match accounts::provision_user(&state.db_pool, &claims).await {
                Ok(user) => {
                    request.extensions_mut().insert(user);
                }
                Err(e) => {
                    tracing::warn!("Best-effort user lookup failed: {}", e);
                }
            },
            Err(e) => {
                tracing::debug!("Ignoring invalid token on optional-auth route: {}", e);
            }
        }
    }

    next.run(request).await
}
