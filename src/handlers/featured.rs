// src/handlers/featured.rs
use crate::error::AppError;
use crate::models::product::Product;
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::FromRow;
use std::sync::Arc;
use uuid::Uuid;

pub fn featured_routes() -> Router {
    Router::new()
        .route("/api/featured/create", post(create_featured))
        .route("/api/featured/list", get(list_featured))
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FeaturedProduct {
    pub id: Uuid,
    pub product_id: Uuid,
    pub status: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFeaturedRequest {
    product_id: Option<String>,
    status: Option<bool>,
    start_date: Option<String>,
    end_date: Option<String>,
}

fn parse_date(raw: &str, label: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|_| AppError::Validation(format!("Invalid {} date format", label)))
}

async fn create_featured(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<CreateFeaturedRequest>,
) -> Result<Json<Value>, AppError> {
    let raw_id = payload
        .product_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::Validation("Product ID is required".to_string()))?;
    let product_id =
        Uuid::parse_str(raw_id).map_err(|_| AppError::Validation("Invalid productId".to_string()))?;

    let product = sqlx::query("SELECT id FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(&state.db_pool)
        .await?;
    if product.is_none() {
        return Err(AppError::NotFound("Product not found".to_string()));
    }

    let start_date = payload
        .start_date
        .as_deref()
        .map(|raw| parse_date(raw, "start"))
        .transpose()?;
    let end_date = payload
        .end_date
        .as_deref()
        .map(|raw| parse_date(raw, "end"))
        .transpose()?;

    if let (Some(start), Some(end)) = (start_date, end_date) {
        if start > end {
            return Err(AppError::Validation(
                "Start date must be before end date".to_string(),
            ));
        }
    }

    let existing = sqlx::query(
        "SELECT id FROM featured_products WHERE product_id = $1 AND status = TRUE",
    )
    .bind(product_id)
    .fetch_optional(&state.db_pool)
    .await?;
    if existing.is_some() {
        return Err(AppError::Validation(
            "Product is already featured".to_string(),
        ));
    }

    let featured = sqlx::query_as::<_, FeaturedProduct>(
        "INSERT INTO featured_products (product_id, status, start_date, end_date)
         VALUES ($1, $2, $3, $4)
         RETURNING *",
    )
    .bind(product_id)
    .bind(payload.status.unwrap_or(true))
    .bind(start_date)
    .bind(end_date)
    .fetch_one(&state.db_pool)
    .await?;

    Ok(Json(json!({ "success": true, "data": featured })))
}

#[derive(Debug, Deserialize)]
pub struct FeaturedListQuery {
    page: Option<i64>,
    limit: Option<i64>,
}

// A featured entry is live when its window covers the current time; missing
// bounds leave the window open on that side.
const ACTIVE_WINDOW: &str = "status = TRUE
           AND (start_date IS NULL OR start_date <= NOW())
           AND (end_date IS NULL OR end_date >= NOW())";

async fn list_featured(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<FeaturedListQuery>,
) -> Result<Json<Value>, AppError> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    let offset = (page - 1) * limit;

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM featured_products WHERE {}",
        ACTIVE_WINDOW
    ))
    .fetch_one(&state.db_pool)
    .await?;

    let featured = sqlx::query_as::<_, FeaturedProduct>(&format!(
        "SELECT * FROM featured_products WHERE {}
         ORDER BY created_at DESC
         LIMIT $1 OFFSET $2",
        ACTIVE_WINDOW
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db_pool)
    .await?;

    let product_ids: Vec<Uuid> = featured.iter().map(|entry| entry.product_id).collect();
    let products = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ANY($1)")
        .bind(&product_ids)
        .fetch_all(&state.db_pool)
        .await?;

    let featured_with_products: Vec<Value> = featured
        .into_iter()
        .map(|entry| {
            let product = products.iter().find(|p| p.id == entry.product_id);
            json!({
                "id": entry.id,
                "productId": entry.product_id,
                "status": entry.status,
                "startDate": entry.start_date,
                "endDate": entry.end_date,
                "createdAt": entry.created_at,
                "updatedAt": entry.updated_at,
                "product": product,
            })
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "data": {
            "featuredProducts": featured_with_products,
            "pagination": {
                "total": total,
                "page": page,
                "limit": limit,
                "totalPages": (total + limit - 1) / limit,
            },
        },
    })))
}
