// src/services/accounts.rs
//
// Local user provisioning from identity-provider claims. The provider owns
// authentication; this service only mirrors the verified claims into a
// users row: match by provider subject, fall back to email (back-filling
// the subject and refreshed profile fields), create otherwise.
use crate::error::AppError;
use crate::middleware::auth::IdentityClaims;
use crate::models::user::User;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn provision_user(pool: &PgPool, claims: &IdentityClaims) -> Result<User, AppError> {
    if let Some(user) = sqlx::query_as::<_, User>("SELECT * FROM users WHERE subject_id = $1")
        .bind(&claims.sub)
        .fetch_optional(pool)
        .await?
    {
        return Ok(user);
    }

    let display_name = claims
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(&claims.email)
        .to_string();

    if let Some(existing) = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&claims.email)
        .fetch_optional(pool)
        .await?
    {
        let updated = sqlx::query_as::<_, User>(
            "UPDATE users
             SET subject_id = $2, name = $3, avatar_url = $4, status = 'active', updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(existing.id)
        .bind(&claims.sub)
        .bind(&display_name)
        .bind(&claims.picture)
        .fetch_one(pool)
        .await?;

        tracing::info!("Linked existing user {} to identity subject", updated.id);
        return Ok(updated);
    }

    let created = sqlx::query_as::<_, User>(
        "INSERT INTO users (name, email, subject_id, avatar_url, status)
         VALUES ($1, $2, $3, $4, 'active')
         RETURNING *",
    )
    .bind(&display_name)
    .bind(&claims.email)
    .bind(&claims.sub)
    .bind(&claims.picture)
    .fetch_one(pool)
    .await;

    match created {
        Ok(user) => {
            tracing::info!("Provisioned new user {} from identity claims", user.id);
            Ok(user)
        }
        Err(e) => {
            // A concurrent request may have created the row first.
            tracing::warn!("User insert failed, re-checking by subject: {}", e);
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE subject_id = $1")
                .bind(&claims.sub)
                .fetch_optional(pool)
                .await?
                .ok_or(AppError::Database(e))
        }
    }
}

pub async fn delete_user(pool: &PgPool, user_id: Uuid) -> Result<Option<User>, AppError> {
    let deleted = sqlx::query_as::<_, User>("DELETE FROM users WHERE id = $1 RETURNING *")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(deleted)
}
