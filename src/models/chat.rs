// src/models/chat.rs
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    pub name: String,
    pub session_id: String,
    pub status: String,
    #[serde(rename = "chatType")]
    pub kind: String,
    pub message_count: i32,
    pub last_message_at: chrono::DateTime<chrono::Utc>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub content: String,
    pub sender: String,
    pub session_id: String,
    pub model: Option<String>,
    pub processing_ms: Option<i64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Which catalog the assistant draws recommendations from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Product,
    Opportunity,
}

impl ChatKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "product" => Some(ChatKind::Product),
            "opportunity" => Some(ChatKind::Opportunity),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Product => "product",
            ChatKind::Opportunity => "opportunity",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub session_id: Option<String>,
    pub name: Option<String>,
    pub chat_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_id: Option<String>,
    pub session_id: Option<String>,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_kind_parsing() {
        assert_eq!(ChatKind::parse("product"), Some(ChatKind::Product));
        assert_eq!(ChatKind::parse("opportunity"), Some(ChatKind::Opportunity));
        assert_eq!(ChatKind::parse("job"), None);
        assert_eq!(ChatKind::parse(""), None);
    }

    #[test]
    fn test_chat_kind_round_trip() {
        for kind in [ChatKind::Product, ChatKind::Opportunity] {
            assert_eq!(ChatKind::parse(kind.as_str()), Some(kind));
        }
    }
}
