// src/models/opportunity.rs
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub country: String,
    pub ministry: Option<String>,
    pub categories: Vec<String>,
    pub description: String,
    pub created_by: Option<Uuid>,
    pub active: bool,
    pub sponsored: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// A validated opportunity ready for insertion.
#[derive(Debug, Clone)]
pub struct NewOpportunity {
    pub name: String,
    pub email: String,
    pub country: String,
    pub ministry: Option<String>,
    pub categories: Vec<String>,
    pub description: String,
    pub active: bool,
    pub sponsored: bool,
    pub kind: String,
}
