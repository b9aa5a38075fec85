// src/models/feedback.rs
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProductFeedback {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub up_voted: bool,
    pub down_voted: bool,
    pub used: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackAnalytics {
    pub id: Uuid,
    pub product_id: Uuid,
    pub up_vote: i32,
    pub down_vote: i32,
    pub in_use: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitFeedbackRequest {
    pub product_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub added: Option<bool>,
}
