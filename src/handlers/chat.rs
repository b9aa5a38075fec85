// src/handlers/chat.rs
use crate::error::AppError;
use crate::middleware::auth::auth_middleware;
use crate::models::chat::{Chat, ChatKind, ChatMessage, CreateChatRequest, SendMessageRequest};
use crate::models::user::User;
use crate::openrouter_client::{ChatCompletionMessage, GenerationConfig};
use crate::services::{prompt, quota};
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    response::sse::{Event, KeepAlive, Sse},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

/// How many prior messages are replayed to the model as context.
const CONTEXT_MESSAGE_LIMIT: i64 = 10;

pub fn chat_routes() -> Router {
    let public_routes = Router::new()
        .route("/api/chat/send", post(send_message))
        .route("/api/chat/messages", get(get_messages));

    let protected_routes = Router::new()
        .route("/api/chat/create", post(create_chat))
        .layer(axum::middleware::from_fn(auth_middleware));

    public_routes.merge(protected_routes)
}

async fn create_chat(
    Extension(state): Extension<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(payload): Json<CreateChatRequest>,
) -> Result<Json<Value>, AppError> {
    let session_id = payload
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|session| !session.is_empty())
        .ok_or_else(|| AppError::Validation("Session ID is required".to_string()))?;

    let kind = match payload.chat_type.as_deref() {
        None => ChatKind::Product,
        Some(raw) => ChatKind::parse(raw).ok_or_else(|| {
            AppError::Validation("Invalid chatType. Must be: product or opportunity".to_string())
        })?,
    };

    let allowance = quota::check_chat_allowance(&state.db_pool, &user).await?;
    if !allowance.can_chat {
        tracing::info!("User {} hit the monthly chat limit", user.id);
        return Err(AppError::RateLimited);
    }

    let name = payload
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| format!("Chat Session - {}", Utc::now().format("%m/%d/%Y")));

    let chat = sqlx::query_as::<_, Chat>(
        "INSERT INTO chats (name, session_id, status, kind, message_count, last_message_at)
         VALUES ($1, $2, 'active', $3, 0, NOW())
         RETURNING *",
    )
    .bind(&name)
    .bind(session_id)
    .bind(kind.as_str())
    .fetch_one(&state.db_pool)
    .await?;

    quota::increment_chat_count(&state.db_pool, user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "chat": chat,
            "remainingChats": quota::remaining_after_creation(allowance),
        },
    })))
}

async fn load_active_chat(
    pool: &PgPool,
    chat_id: Uuid,
    session_id: &str,
) -> Result<Chat, AppError> {
    sqlx::query_as::<_, Chat>(
        "SELECT * FROM chats WHERE id = $1 AND session_id = $2 AND status = 'active'",
    )
    .bind(chat_id)
    .bind(session_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Chat not found or access denied".to_string()))
}

async fn bump_chat_counters(pool: &PgPool, chat_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE chats
         SET message_count = message_count + 1, last_message_at = NOW(), updated_at = NOW()
         WHERE id = $1",
    )
    .bind(chat_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn send_message(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (Some(chat_id), Some(session_id), Some(message)) =
        (payload.chat_id, payload.session_id, payload.message)
    else {
        return Err(AppError::Validation(
            "Chat ID, session ID, and message are required".to_string(),
        ));
    };
    if message.trim().is_empty() {
        return Err(AppError::Validation(
            "Chat ID, session ID, and message are required".to_string(),
        ));
    }

    let chat_id =
        Uuid::parse_str(&chat_id).map_err(|_| AppError::Validation("Invalid chatId".to_string()))?;

    let chat = load_active_chat(&state.db_pool, chat_id, &session_id).await?;
    let kind = ChatKind::parse(&chat.kind).unwrap_or(ChatKind::Product);

    let client = state
        .ai_client
        .clone()
        .ok_or_else(|| AppError::Upstream("Text generation is not configured".to_string()))?;

    let started = Instant::now();

    // The user's message is durable before anything upstream can fail.
    let user_message = sqlx::query_as::<_, ChatMessage>(
        "INSERT INTO chat_messages (chat_id, content, sender, session_id)
         VALUES ($1, $2, 'user', $3)
         RETURNING *",
    )
    .bind(chat.id)
    .bind(&message)
    .bind(&session_id)
    .fetch_one(&state.db_pool)
    .await?;

    bump_chat_counters(&state.db_pool, chat.id).await?;

    let mut history = sqlx::query_as::<_, ChatMessage>(
        "SELECT * FROM chat_messages
         WHERE chat_id = $1 AND id <> $2
         ORDER BY created_at DESC
         LIMIT $3",
    )
    .bind(chat.id)
    .bind(user_message.id)
    .bind(CONTEXT_MESSAGE_LIMIT)
    .fetch_all(&state.db_pool)
    .await?;
    history.reverse();

    let system_prompt = prompt::build_system_prompt(&state.db_pool, kind).await?;

    let mut context = Vec::with_capacity(history.len() + 2);
    context.push(ChatCompletionMessage {
        role: "system".to_string(),
        content: system_prompt,
    });
    for entry in &history {
        context.push(ChatCompletionMessage {
            role: if entry.sender == "ai" {
                "assistant".to_string()
            } else {
                "user".to_string()
            },
            content: entry.content.clone(),
        });
    }
    context.push(ChatCompletionMessage {
        role: "user".to_string(),
        content: message,
    });

    tracing::info!(
        "Starting AI response stream for chat {} ({} context messages)",
        chat.id,
        context.len()
    );

    let upstream = client
        .stream_chat(context, GenerationConfig::default())
        .await
        .map_err(AppError::Upstream)?;

    let model = client.model().to_string();
    let (tx, rx) = mpsc::channel::<Event>(32);

    tokio::spawn(relay_generation(
        state.db_pool.clone(),
        chat.id,
        session_id,
        model,
        started,
        upstream,
        tx,
    ));

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, Infallible>(event), rx))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Forwards upstream chunks to the client in generation order and returns
/// the assembled text. Returns None when the upstream errored, produced no
/// text, or the client went away; None means nothing may be persisted.
/// Chunks already delivered are never retracted.
async fn forward_chunks(
    mut upstream: mpsc::Receiver<Result<String, String>>,
    tx: &mpsc::Sender<Event>,
) -> Option<String> {
    let mut full_response = String::new();

    while let Some(item) = upstream.recv().await {
        match item {
            Ok(chunk) => {
                full_response.push_str(&chunk);
                let event = Event::default().data(json!({ "content": chunk }).to_string());
                if tx.send(event).await.is_err() {
                    tracing::info!("Client disconnected mid-stream; dropping partial response");
                    return None;
                }
            }
            Err(e) => {
                tracing::error!("Upstream generation failed: {}", e);
                let event = Event::default()
                    .event("error")
                    .data(json!({ "error": "Generation failed" }).to_string());
                let _ = tx.send(event).await;
                return None;
            }
        }
    }

    if full_response.is_empty() {
        // A clean close with no text carries no user value.
        tracing::warn!("Upstream returned an empty response");
        let event = Event::default()
            .event("error")
            .data(json!({ "error": "Empty response from model" }).to_string());
        let _ = tx.send(event).await;
        return None;
    }

    Some(full_response)
}

/// Drives one generation: relays chunks to the client and persists the
/// assembled reply once the upstream stream completes cleanly.
async fn relay_generation(
    pool: PgPool,
    chat_id: Uuid,
    session_id: String,
    model: String,
    started: Instant,
    upstream: mpsc::Receiver<Result<String, String>>,
    tx: mpsc::Sender<Event>,
) {
    let Some(full_response) = forward_chunks(upstream, &tx).await else {
        return;
    };

    let processing_ms = started.elapsed().as_millis() as i64;

    let saved = sqlx::query(
        "INSERT INTO chat_messages (chat_id, content, sender, session_id, model, processing_ms)
         VALUES ($1, $2, 'ai', $3, $4, $5)",
    )
    .bind(chat_id)
    .bind(&full_response)
    .bind(&session_id)
    .bind(&model)
    .bind(processing_ms)
    .execute(&pool)
    .await;

    match saved {
        Ok(_) => {
            if let Err(e) = bump_chat_counters(&pool, chat_id).await {
                tracing::error!("Failed to update chat {} after AI reply: {}", chat_id, e);
            }
            tracing::info!(
                "AI response completed for chat {} ({} chars, {} ms)",
                chat_id,
                full_response.len(),
                processing_ms
            );
        }
        Err(e) => {
            // The client already has the full text; only the record is lost.
            tracing::error!("Failed to persist AI reply for chat {}: {}", chat_id, e);
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    chat_id: Option<String>,
    session_id: Option<String>,
    limit: Option<i64>,
    page: Option<i64>,
}

async fn get_messages(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<MessagesQuery>,
) -> Result<Json<Value>, AppError> {
    let (Some(chat_id), Some(session_id)) = (params.chat_id, params.session_id) else {
        return Err(AppError::Validation(
            "Chat ID and session ID are required".to_string(),
        ));
    };

    let chat_id =
        Uuid::parse_str(&chat_id).map_err(|_| AppError::Validation("Invalid chatId".to_string()))?;

    let chat = load_active_chat(&state.db_pool, chat_id, &session_id).await?;

    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let page = params.page.unwrap_or(1).max(1);
    let offset = (page - 1) * limit;

    let messages = sqlx::query_as::<_, ChatMessage>(
        "SELECT * FROM chat_messages
         WHERE chat_id = $1
         ORDER BY created_at ASC
         LIMIT $2 OFFSET $3",
    )
    .bind(chat.id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db_pool)
    .await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE chat_id = $1")
        .bind(chat.id)
        .fetch_one(&state.db_pool)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "messages": messages,
            "total": total,
            "page": page,
            "limit": limit,
        },
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chunks_are_assembled_in_order() {
        let (upstream_tx, upstream_rx) = mpsc::channel(8);
        let (tx, mut rx) = mpsc::channel(8);

        upstream_tx.send(Ok("Hello".to_string())).await.unwrap();
        upstream_tx.send(Ok(", ".to_string())).await.unwrap();
        upstream_tx.send(Ok("world".to_string())).await.unwrap();
        drop(upstream_tx);

        let assembled = forward_chunks(upstream_rx, &tx).await;
        assert_eq!(assembled, Some("Hello, world".to_string()));

        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 3);
    }

    #[tokio::test]
    async fn test_upstream_error_suppresses_persistence() {
        let (upstream_tx, upstream_rx) = mpsc::channel(8);
        let (tx, mut rx) = mpsc::channel(8);

        upstream_tx.send(Ok("partial".to_string())).await.unwrap();
        upstream_tx
            .send(Err("connection reset".to_string()))
            .await
            .unwrap();
        drop(upstream_tx);

        // Nothing to persist, but the partial chunk plus a terminal error
        // event were still delivered.
        assert_eq!(forward_chunks(upstream_rx, &tx).await, None);

        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 2);
    }

    #[tokio::test]
    async fn test_empty_completion_is_an_error() {
        let (upstream_tx, upstream_rx) = mpsc::channel::<Result<String, String>>(8);
        let (tx, mut rx) = mpsc::channel(8);

        drop(upstream_tx);

        assert_eq!(forward_chunks(upstream_rx, &tx).await, None);
        // A single terminal error event.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_client_disconnect_stops_the_relay() {
        let (upstream_tx, upstream_rx) = mpsc::channel(8);
        let (tx, rx) = mpsc::channel(1);

        drop(rx);
        upstream_tx.send(Ok("chunk".to_string())).await.unwrap();
        drop(upstream_tx);

        assert_eq!(forward_chunks(upstream_rx, &tx).await, None);
    }
}
