// src/models/product.rs
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub country: String,
    pub categories: Vec<String>,
    pub description: String,
    pub website: String,
    pub logo: Option<String>,
    pub active: bool,
    pub featured: bool,
    pub submitted_by: Option<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Category fields arrive from clients either as a single string or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// A validated product ready for insertion.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub country: String,
    pub categories: Vec<String>,
    pub description: String,
    pub website: String,
    pub logo: Option<String>,
    pub active: bool,
    pub featured: bool,
}
