// src/handlers/products.rs
use crate::error::AppError;
use crate::middleware::auth::{auth_middleware, maybe_auth_middleware};
use crate::models::feedback::{FeedbackAnalytics, ProductFeedback, SubmitFeedbackRequest};
use crate::models::product::{NewProduct, OneOrMany, Product};
use crate::models::user::User;
use crate::services::feedback::{self, FeedbackKind};
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub fn product_routes() -> Router {
    let public_routes = Router::new()
        .route("/api/products/list", get(list_products))
        .route("/api/products/get", get(get_product))
        .route("/api/products/create", post(create_products))
        .route("/api/submit/dev/product", post(dev_seed_products));

    let feedback_routes = Router::new()
        .route("/api/products/get-feedback", get(get_feedback))
        .layer(axum::middleware::from_fn(maybe_auth_middleware));

    let protected_routes = Router::new()
        .route("/api/products/submit-feedback", post(submit_feedback))
        .route("/api/submit/product", post(submit_product))
        .layer(axum::middleware::from_fn(auth_middleware));

    public_routes.merge(feedback_routes).merge(protected_routes)
}

#[derive(Debug, Deserialize)]
pub struct ProductListQuery {
    search: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
    country: Option<String>,
    category: Option<String>,
}

const PRODUCT_FILTER: &str = "($1::text IS NULL OR name ILIKE '%' || $1 || '%' OR description ILIKE '%' || $1 || '%')
           AND ($2::text IS NULL OR country = $2)
           AND ($3::text IS NULL OR $3 = ANY(categories))";

async fn list_products(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ProductListQuery>,
) -> Result<Json<Value>, AppError> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    let offset = (page - 1) * limit;

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM products WHERE {}",
        PRODUCT_FILTER
    ))
    .bind(&params.search)
    .bind(&params.country)
    .bind(&params.category)
    .fetch_one(&state.db_pool)
    .await?;

    let products = sqlx::query_as::<_, Product>(&format!(
        "SELECT * FROM products WHERE {}
         ORDER BY created_at DESC
         LIMIT $4 OFFSET $5",
        PRODUCT_FILTER
    ))
    .bind(&params.search)
    .bind(&params.country)
    .bind(&params.category)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db_pool)
    .await?;

    let countries: Vec<String> =
        sqlx::query_scalar("SELECT DISTINCT country FROM products ORDER BY country")
            .fetch_all(&state.db_pool)
            .await?;

    let categories: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT unnest(categories) AS category FROM products ORDER BY category",
    )
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "products": products,
            "pagination": {
                "total": total,
                "page": page,
                "limit": limit,
                "pages": (total + limit - 1) / limit,
            },
            "filters": {
                "countries": countries,
                "categories": categories,
            },
        },
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductGetQuery {
    product_id: Option<String>,
}

fn parse_product_id(raw: Option<&str>) -> Result<Uuid, AppError> {
    let raw = raw.ok_or_else(|| {
        AppError::Validation("Missing required parameter: productId".to_string())
    })?;
    Uuid::parse_str(raw).map_err(|_| AppError::Validation("Invalid productId".to_string()))
}

async fn get_product(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ProductGetQuery>,
) -> Result<Json<Value>, AppError> {
    let product_id = parse_product_id(params.product_id.as_deref())?;

    let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;

    Ok(Json(json!({ "product": product })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductPayload {
    name: Option<String>,
    country: Option<String>,
    category: Option<OneOrMany>,
    description: Option<String>,
    website: Option<String>,
    logo: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CreateProductsBody {
    Bulk(Vec<CreateProductPayload>),
    Single(CreateProductPayload),
}

fn require_text(value: Option<&str>, field: &str) -> Result<String, AppError> {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(AppError::Validation(format!(
            "Missing required field: {}",
            field
        ))),
    }
}

fn validate_product(payload: CreateProductPayload) -> Result<NewProduct, AppError> {
    let name = require_text(payload.name.as_deref(), "name")?;
    let country = require_text(payload.country.as_deref(), "country")?;
    let description = require_text(payload.description.as_deref(), "description")?;
    let website = require_text(payload.website.as_deref(), "website")?;

    let categories = payload
        .category
        .map(OneOrMany::into_vec)
        .filter(|categories| !categories.is_empty())
        .ok_or_else(|| AppError::Validation("Missing required field: category".to_string()))?;

    Ok(NewProduct {
        name,
        country,
        categories,
        description,
        website,
        logo: payload.logo.filter(|logo| !logo.is_empty()),
        active: false,
        featured: false,
    })
}

async fn insert_product(
    state: &AppState,
    product: &NewProduct,
    submitted_by: Option<Uuid>,
) -> Result<Product, AppError> {
    let created = sqlx::query_as::<_, Product>(
        "INSERT INTO products (name, country, categories, description, website, logo, active, featured, submitted_by)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING *",
    )
    .bind(&product.name)
    .bind(&product.country)
    .bind(&product.categories)
    .bind(&product.description)
    .bind(&product.website)
    .bind(&product.logo)
    .bind(product.active)
    .bind(product.featured)
    .bind(submitted_by)
    .fetch_one(&state.db_pool)
    .await?;

    Ok(created)
}

async fn create_products(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<CreateProductsBody>,
) -> Result<Json<Value>, AppError> {
    match body {
        CreateProductsBody::Single(payload) => {
            let product = validate_product(payload)?;
            let created = insert_product(&state, &product, None).await?;
            Ok(Json(json!({ "success": true, "data": created })))
        }
        CreateProductsBody::Bulk(payloads) => {
            let validated = payloads
                .into_iter()
                .map(validate_product)
                .collect::<Result<Vec<_>, _>>()?;

            let mut created = Vec::with_capacity(validated.len());
            for product in &validated {
                created.push(insert_product(&state, product, None).await?);
            }

            Ok(Json(json!({ "success": true, "data": created })))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitProductRequest {
    name: Option<String>,
    country: Option<String>,
    categories: Option<OneOrMany>,
    description: Option<String>,
    website: Option<String>,
    logo: Option<String>,
    your_name: Option<String>,
    your_email: Option<String>,
}

async fn submit_product(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(payload): Json<SubmitProductRequest>,
) -> Result<Json<Value>, AppError> {
    let name = require_text(payload.name.as_deref(), "name")?;
    let country = require_text(payload.country.as_deref(), "country")?;
    let description = require_text(payload.description.as_deref(), "description")?;
    let website = require_text(payload.website.as_deref(), "website")?;
    require_text(payload.your_name.as_deref(), "yourName")?;
    require_text(payload.your_email.as_deref(), "yourEmail")?;

    let categories = payload
        .categories
        .map(OneOrMany::into_vec)
        .filter(|categories| !categories.is_empty())
        .ok_or_else(|| AppError::Validation("Missing required field: categories".to_string()))?;

    let product = NewProduct {
        name,
        country,
        categories,
        description,
        website,
        logo: payload.logo.filter(|logo| !logo.is_empty()),
        // Submissions go through moderation before they are listed.
        active: false,
        featured: false,
    };

    let created = insert_product(&state, &product, Some(user.id)).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Product submitted successfully",
        "data": {
            "id": created.id,
            "name": created.name,
            "country": created.country,
            "categories": created.categories,
            "description": created.description,
            "website": created.website,
            "logo": created.logo,
            "active": created.active,
            "createdAt": created.created_at,
        },
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedProductPayload {
    name: Option<String>,
    country: Option<String>,
    categories: Option<OneOrMany>,
    description: Option<String>,
    website: Option<String>,
    logo: Option<String>,
    active: Option<bool>,
    featured: Option<bool>,
}

fn validate_seed_product(
    payload: SeedProductPayload,
    index: usize,
    errors: &mut Vec<String>,
) -> Option<NewProduct> {
    let mut missing = Vec::new();
    for (value, field) in [
        (&payload.name, "name"),
        (&payload.country, "country"),
        (&payload.description, "description"),
        (&payload.website, "website"),
    ] {
        if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
            missing.push(field);
        }
    }

    let categories = payload
        .categories
        .map(OneOrMany::into_vec)
        .filter(|categories| !categories.is_empty());
    if categories.is_none() {
        missing.push("categories");
    }

    if !missing.is_empty() {
        for field in missing {
            errors.push(format!(
                "Product at index {}: Missing required field: {}",
                index, field
            ));
        }
        return None;
    }

    Some(NewProduct {
        name: payload.name.unwrap(),
        country: payload.country.unwrap(),
        categories: categories.unwrap(),
        description: payload.description.unwrap(),
        website: payload.website.unwrap(),
        logo: payload.logo.filter(|logo| !logo.is_empty()),
        active: payload.active.unwrap_or(false),
        featured: payload.featured.unwrap_or(false),
    })
}

async fn dev_seed_products(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<Vec<SeedProductPayload>>,
) -> Result<Json<Value>, AppError> {
    let mut errors = Vec::new();
    let mut validated = Vec::new();

    for (index, payload) in body.into_iter().enumerate() {
        if let Some(product) = validate_seed_product(payload, index, &mut errors) {
            validated.push(product);
        }
    }

    if !errors.is_empty() {
        return Err(AppError::Validation(format!(
            "Validation errors: {}",
            errors.join("; ")
        )));
    }

    let mut created = Vec::with_capacity(validated.len());
    for product in &validated {
        created.push(insert_product(&state, product, None).await?);
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("{} products created successfully", created.len()),
        "data": created,
    })))
}

async fn submit_feedback(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(payload): Json<SubmitFeedbackRequest>,
) -> Result<Json<Value>, AppError> {
    let (Some(product_id), Some(kind), Some(added)) =
        (payload.product_id, payload.kind, payload.added)
    else {
        return Err(AppError::Validation(
            "Missing required fields: productId, type, added".to_string(),
        ));
    };

    let kind = FeedbackKind::parse(&kind).ok_or_else(|| {
        AppError::Validation("Invalid type. Must be: upvote, downvote, or used".to_string())
    })?;

    let product_id = Uuid::parse_str(&product_id)
        .map_err(|_| AppError::Validation("Invalid productId".to_string()))?;

    let (user_feedback, analytics) =
        feedback::submit_feedback(&state.db_pool, product_id, user.id, kind, added).await?;

    Ok(Json(json!({
        "success": true,
        "userFeedback": user_feedback,
        "analytics": {
            "upVote": analytics.up_vote,
            "downVote": analytics.down_vote,
            "inUse": analytics.in_use,
        },
    })))
}

async fn get_feedback(
    Extension(state): Extension<Arc<AppState>>,
    user: Option<Extension<User>>,
    Query(params): Query<ProductGetQuery>,
) -> Result<Json<Value>, AppError> {
    let product_id = parse_product_id(params.product_id.as_deref())?;

    let analytics = sqlx::query_as::<_, FeedbackAnalytics>(
        "SELECT * FROM product_feedback_analytics WHERE product_id = $1",
    )
    .bind(product_id)
    .fetch_optional(&state.db_pool)
    .await?;

    let mut body = json!({
        "analytics": {
            "upVote": analytics.as_ref().map(|a| a.up_vote).unwrap_or(0),
            "downVote": analytics.as_ref().map(|a| a.down_vote).unwrap_or(0),
            "inUse": analytics.as_ref().map(|a| a.in_use).unwrap_or(0),
        },
    });

    if let Some(Extension(user)) = user {
        // Best effort: a failed lookup degrades to "no feedback shown".
        match sqlx::query_as::<_, ProductFeedback>(
            "SELECT * FROM product_feedback WHERE product_id = $1 AND user_id = $2",
        )
        .bind(product_id)
        .bind(user.id)
        .fetch_optional(&state.db_pool)
        .await
        {
            Ok(user_feedback) => {
                body["userFeedback"] = match user_feedback {
                    Some(feedback) => json!({
                        "upVoted": feedback.up_voted,
                        "downVoted": feedback.down_voted,
                        "used": feedback.used,
                    }),
                    None => json!({ "upVoted": false, "downVoted": false, "used": false }),
                };
            }
            Err(e) => {
                tracing::warn!("Failed to load user feedback for {}: {}", product_id, e);
            }
        }
    }

    Ok(Json(body))
}
