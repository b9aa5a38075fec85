// src/handlers/users.rs
use crate::error::AppError;
use crate::middleware::auth::auth_middleware;
use crate::models::user::{User, UserResponse};
use crate::services::accounts;
use crate::AppState;
use axum::{
    extract::Extension,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn user_routes() -> Router {
    Router::new()
        .route("/api/user/get", get(get_current_user))
        .route("/api/user/create", post(create_user))
        .route("/api/user/delete", delete(delete_current_user))
        .layer(axum::middleware::from_fn(auth_middleware))
}

async fn get_current_user(Extension(user): Extension<User>) -> Json<Value> {
    Json(json!({
        "success": true,
        "user": UserResponse::from(user),
    }))
}

// Provisioning already happened in the auth middleware; this endpoint exists
// so clients can force the sync right after sign-in.
async fn create_user(Extension(user): Extension<User>) -> Json<Value> {
    Json(json!({
        "success": true,
        "user": UserResponse::from(user),
    }))
}

async fn delete_current_user(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let deleted = accounts::delete_user(&state.db_pool, user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    tracing::info!("Deleted user {}", deleted.id);

    Ok(Json(json!({
        "success": true,
        "message": "User deleted successfully",
        "user": {
            "id": deleted.id,
            "name": deleted.name,
            "email": deleted.email,
        },
    })))
}
