// src/services/quota.rs
//
// Monthly chat quota: a per-(user, year, month) counter row, created lazily
// and incremented on chat creation. Users flagged unlimited bypass the cap.
use crate::error::AppError;
use crate::models::user::User;
use chrono::{Datelike, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub const MONTHLY_CHAT_LIMIT: i32 = 3;

/// Remaining-quota sentinel for unlimited users.
pub const UNLIMITED: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatAllowance {
    pub can_chat: bool,
    pub remaining: i32,
}

pub fn allowance(unlimited: bool, chats_used: i32) -> ChatAllowance {
    if unlimited {
        return ChatAllowance {
            can_chat: true,
            remaining: UNLIMITED,
        };
    }

    ChatAllowance {
        can_chat: chats_used < MONTHLY_CHAT_LIMIT,
        remaining: (MONTHLY_CHAT_LIMIT - chats_used).max(0),
    }
}

/// Remaining quota to report after a successful creation.
pub fn remaining_after_creation(before: ChatAllowance) -> i32 {
    if before.remaining == UNLIMITED {
        UNLIMITED
    } else {
        (before.remaining - 1).max(0)
    }
}

pub async fn check_chat_allowance(pool: &PgPool, user: &User) -> Result<ChatAllowance, AppError> {
    if user.unlimited {
        return Ok(allowance(true, 0));
    }

    let now = Utc::now();
    let (year, month) = (now.year(), now.month() as i32);

    let chats_used = sqlx::query_scalar::<_, i32>(
        "SELECT chat_count FROM chat_usage WHERE user_id = $1 AND year = $2 AND month = $3",
    )
    .bind(user.id)
    .bind(year)
    .bind(month)
    .fetch_optional(pool)
    .await?;

    let chats_used = match chats_used {
        Some(count) => count,
        None => {
            // First check this month creates the counter row.
            sqlx::query(
                "INSERT INTO chat_usage (user_id, year, month, chat_count)
                 VALUES ($1, $2, $3, 0)
                 ON CONFLICT (user_id, year, month) DO NOTHING",
            )
            .bind(user.id)
            .bind(year)
            .bind(month)
            .execute(pool)
            .await?;
            0
        }
    };

    Ok(allowance(false, chats_used))
}

pub async fn increment_chat_count(pool: &PgPool, user_id: Uuid) -> Result<(), AppError> {
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO chat_usage (user_id, year, month, chat_count)
         VALUES ($1, $2, $3, 1)
         ON CONFLICT (user_id, year, month) DO UPDATE
         SET chat_count = chat_usage.chat_count + 1, updated_at = NOW()",
    )
    .bind(user_id)
    .bind(now.year())
    .bind(now.month() as i32)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_user_bypasses_cap() {
        let a = allowance(true, 250);
        assert!(a.can_chat);
        assert_eq!(a.remaining, UNLIMITED);
        assert_eq!(remaining_after_creation(a), UNLIMITED);
    }

    #[test]
    fn test_third_chat_is_allowed_with_zero_remaining_after() {
        let a = allowance(false, 2);
        assert!(a.can_chat);
        assert_eq!(a.remaining, 1);
        assert_eq!(remaining_after_creation(a), 0);
    }

    #[test]
    fn test_fourth_chat_is_denied() {
        let a = allowance(false, 3);
        assert!(!a.can_chat);
        assert_eq!(a.remaining, 0);
    }

    #[test]
    fn test_remaining_never_goes_negative() {
        let a = allowance(false, 7);
        assert!(!a.can_chat);
        assert_eq!(a.remaining, 0);
        assert_eq!(remaining_after_creation(a), 0);
    }
}
