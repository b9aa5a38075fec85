// src/handlers/opportunities.rs
use crate::error::AppError;
use crate::middleware::auth::auth_middleware;
use crate::models::opportunity::{NewOpportunity, Opportunity};
use crate::models::product::OneOrMany;
use crate::models::user::User;
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

pub fn opportunity_routes() -> Router {
    let public_routes = Router::new()
        .route("/api/opportunities/list", get(list_opportunities))
        .route("/api/opportunities/get", get(get_opportunity))
        .route("/api/submit/dev/opportunity", post(dev_seed_opportunities));

    let protected_routes = Router::new()
        .route("/api/submit/opportunity", post(submit_opportunity))
        .layer(axum::middleware::from_fn(auth_middleware));

    public_routes.merge(protected_routes)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityListQuery {
    search: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
    country: Option<String>,
    category: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    featured: Option<String>,
}

fn split_csv(raw: Option<&str>) -> Option<Vec<String>> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(String::from)
            .collect::<Vec<_>>()
    })
    .filter(|parts| !parts.is_empty())
}

const OPPORTUNITY_FILTER: &str = "active = TRUE
           AND ($1::text IS NULL OR name ILIKE '%' || $1 || '%' OR description ILIKE '%' || $1 || '%' OR ministry ILIKE '%' || $1 || '%')
           AND ($2::text[] IS NULL OR country = ANY($2))
           AND ($3::text[] IS NULL OR categories && $3)
           AND ($4::text IS NULL OR kind = $4)
           AND ($5::boolean IS NULL OR sponsored = $5)";

async fn list_opportunities(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<OpportunityListQuery>,
) -> Result<Json<Value>, AppError> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    let offset = (page - 1) * limit;

    let countries = split_csv(params.country.as_deref());
    let categories = split_csv(params.category.as_deref());
    let sponsored = if params.featured.as_deref() == Some("true") {
        Some(true)
    } else {
        None
    };

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM opportunities WHERE {}",
        OPPORTUNITY_FILTER
    ))
    .bind(&params.search)
    .bind(&countries)
    .bind(&categories)
    .bind(&params.kind)
    .bind(sponsored)
    .fetch_one(&state.db_pool)
    .await?;

    let opportunities = sqlx::query_as::<_, Opportunity>(&format!(
        "SELECT * FROM opportunities WHERE {}
         ORDER BY created_at DESC
         LIMIT $6 OFFSET $7",
        OPPORTUNITY_FILTER
    ))
    .bind(&params.search)
    .bind(&countries)
    .bind(&categories)
    .bind(&params.kind)
    .bind(sponsored)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db_pool)
    .await?;

    let filter_countries: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT country FROM opportunities WHERE active = TRUE ORDER BY country",
    )
    .fetch_all(&state.db_pool)
    .await?;

    let filter_categories: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT unnest(categories) AS category FROM opportunities WHERE active = TRUE ORDER BY category",
    )
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "opportunities": opportunities,
            "pagination": {
                "total": total,
                "page": page,
                "limit": limit,
                "pages": (total + limit - 1) / limit,
            },
            "filters": {
                "countries": filter_countries,
                "categories": filter_categories,
            },
        },
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityGetQuery {
    opportunity_id: Option<String>,
}

async fn get_opportunity(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<OpportunityGetQuery>,
) -> Result<Json<Value>, AppError> {
    let raw = params.opportunity_id.as_deref().ok_or_else(|| {
        AppError::Validation("Missing required parameter: opportunityId".to_string())
    })?;
    let opportunity_id =
        Uuid::parse_str(raw).map_err(|_| AppError::Validation("Invalid opportunityId".to_string()))?;

    let opportunity = sqlx::query_as::<_, Opportunity>("SELECT * FROM opportunities WHERE id = $1")
        .bind(opportunity_id)
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Opportunity not found".to_string()))?;

    Ok(Json(json!({ "opportunity": opportunity })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOpportunityRequest {
    name: Option<String>,
    email: Option<String>,
    country: Option<String>,
    ministry: Option<String>,
    categories: Option<OneOrMany>,
    description: Option<String>,
    sponsored: Option<bool>,
    #[serde(rename = "type")]
    kind: Option<String>,
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

fn validate_kind(kind: &str) -> Result<String, AppError> {
    match kind {
        "problem" | "job" => Ok(kind.to_string()),
        _ => Err(AppError::Validation(
            "Invalid type. Must be: problem or job".to_string(),
        )),
    }
}

async fn insert_opportunity(
    state: &AppState,
    opportunity: &NewOpportunity,
    created_by: Option<Uuid>,
) -> Result<Opportunity, AppError> {
    let created = sqlx::query_as::<_, Opportunity>(
        "INSERT INTO opportunities (name, email, country, ministry, categories, description, created_by, active, sponsored, kind)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         RETURNING *",
    )
    .bind(&opportunity.name)
    .bind(&opportunity.email)
    .bind(&opportunity.country)
    .bind(&opportunity.ministry)
    .bind(&opportunity.categories)
    .bind(&opportunity.description)
    .bind(created_by)
    .bind(opportunity.active)
    .bind(opportunity.sponsored)
    .bind(&opportunity.kind)
    .fetch_one(&state.db_pool)
    .await?;

    Ok(created)
}

async fn submit_opportunity(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(payload): Json<SubmitOpportunityRequest>,
) -> Result<Json<Value>, AppError> {
    let name = require_text(payload.name.as_deref(), "name")?;
    let email = require_text(payload.email.as_deref(), "email")?;
    let country = require_text(payload.country.as_deref(), "country")?;
    let description = require_text(payload.description.as_deref(), "description")?;
    let kind = validate_kind(&require_text(payload.kind.as_deref(), "type")?)?;

    let categories = payload
        .categories
        .map(OneOrMany::into_vec)
        .filter(|categories| !categories.is_empty())
        .ok_or_else(|| AppError::Validation("Missing required field: categories".to_string()))?;

    let opportunity = NewOpportunity {
        name,
        email,
        country,
        ministry: payload.ministry.filter(|ministry| !ministry.is_empty()),
        categories,
        description,
        // Submissions go through moderation before they are listed.
        active: false,
        sponsored: payload.sponsored.unwrap_or(false),
        kind,
    };

    let created = insert_opportunity(&state, &opportunity, Some(user.id)).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Opportunity submitted successfully",
        "data": created,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedOpportunityPayload {
    name: Option<String>,
    email: Option<String>,
    country: Option<String>,
    ministry: Option<String>,
    categories: Option<OneOrMany>,
    description: Option<String>,
    active: Option<bool>,
    sponsored: Option<bool>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

fn validate_seed_opportunity(
    payload: SeedOpportunityPayload,
    index: usize,
    errors: &mut Vec<String>,
) -> Option<NewOpportunity> {
    let mut missing = Vec::new();
    for (value, field) in [
        (&payload.name, "name"),
        (&payload.email, "email"),
        (&payload.country, "country"),
        (&payload.description, "description"),
        (&payload.kind, "type"),
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
                "Opportunity at index {}: Missing required field: {}",
                index, field
            ));
        }
        return None;
    }

    let kind = payload.kind.unwrap();
    if validate_kind(&kind).is_err() {
        errors.push(format!(
            "Opportunity at index {}: Invalid type: {}",
            index, kind
        ));
        return None;
    }

    Some(NewOpportunity {
        name: payload.name.unwrap(),
        email: payload.email.unwrap(),
        country: payload.country.unwrap(),
        ministry: payload.ministry.filter(|ministry| !ministry.is_empty()),
        categories: categories.unwrap(),
        description: payload.description.unwrap(),
        active: payload.active.unwrap_or(false),
        sponsored: payload.sponsored.unwrap_or(false),
        kind,
    })
}

async fn dev_seed_opportunities(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<Vec<SeedOpportunityPayload>>,
) -> Result<Json<Value>, AppError> {
    let mut errors = Vec::new();
    let mut validated = Vec::new();

    for (index, payload) in body.into_iter().enumerate() {
        if let Some(opportunity) = validate_seed_opportunity(payload, index, &mut errors) {
            validated.push(opportunity);
        }
    }

    if !errors.is_empty() {
        return Err(AppError::Validation(format!(
            "Validation errors: {}",
            errors.join("; ")
        )));
    }

    let mut created = Vec::with_capacity(validated.len());
    for opportunity in &validated {
        created.push(insert_opportunity(&state, opportunity, None).await?);
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("{} opportunities created successfully", created.len()),
        "data": created,
    })))
}
