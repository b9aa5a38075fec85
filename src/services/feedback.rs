// src/services/feedback.rs
//
// Feedback aggregation: one record per (product, user) with mutually
// exclusive up/down votes, and per-product counters maintained by
// incremental deltas. The toggle transition and the counter arithmetic are
// pure functions; storage I/O happens only in submit_feedback.
use crate::error::AppError;
use crate::models::feedback::{FeedbackAnalytics, ProductFeedback};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    UpVote,
    DownVote,
    Used,
}

impl FeedbackKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "upvote" => Some(FeedbackKind::UpVote),
            "downvote" => Some(FeedbackKind::DownVote),
            "used" => Some(FeedbackKind::Used),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedbackFlags {
    pub up_voted: bool,
    pub down_voted: bool,
    pub used: bool,
}

impl From<&ProductFeedback> for FeedbackFlags {
    fn from(feedback: &ProductFeedback) -> Self {
        FeedbackFlags {
            up_voted: feedback.up_voted,
            down_voted: feedback.down_voted,
            used: feedback.used,
        }
    }
}

/// Applies one toggle. Setting an upvote clears a downvote and vice versa;
/// the `used` flag is independent.
pub fn apply_toggle(mut flags: FeedbackFlags, kind: FeedbackKind, desired: bool) -> FeedbackFlags {
    match kind {
        FeedbackKind::UpVote => {
            flags.up_voted = desired;
            if desired {
                flags.down_voted = false;
            }
        }
        FeedbackKind::DownVote => {
            flags.down_voted = desired;
            if desired {
                flags.up_voted = false;
            }
        }
        FeedbackKind::Used => {
            flags.used = desired;
        }
    }
    flags
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterDelta {
    pub up_vote: i32,
    pub down_vote: i32,
    pub in_use: i32,
}

/// Counter adjustments for a transition: +1 for a flag that turned on,
/// -1 for one that turned off. A single toggle can move two counters when
/// mutual exclusion clears the opposite vote.
pub fn counter_delta(before: FeedbackFlags, after: FeedbackFlags) -> CounterDelta {
    fn step(before: bool, after: bool) -> i32 {
        match (before, after) {
            (false, true) => 1,
            (true, false) => -1,
            _ => 0,
        }
    }

    CounterDelta {
        up_vote: step(before.up_voted, after.up_voted),
        down_vote: step(before.down_voted, after.down_voted),
        in_use: step(before.used, after.used),
    }
}

/// Records a user's feedback toggle and updates the product's aggregate
/// counters. The two writes are independent statements; a failure between
/// them leaves the per-user record ahead of the aggregates, which is
/// accepted. Counter increments happen inside the upsert with a zero floor,
/// so concurrent submissions for the same product cannot lose updates or
/// drive a counter negative.
pub async fn submit_feedback(
    pool: &PgPool,
    product_id: Uuid,
    user_id: Uuid,
    kind: FeedbackKind,
    desired: bool,
) -> Result<(ProductFeedback, FeedbackAnalytics), AppError> {
    let product = sqlx::query("SELECT id FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(pool)
        .await?;
    if product.is_none() {
        return Err(AppError::NotFound("Product not found".to_string()));
    }

    let existing = sqlx::query_as::<_, ProductFeedback>(
        "SELECT * FROM product_feedback WHERE product_id = $1 AND user_id = $2",
    )
    .bind(product_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let before = existing.as_ref().map(FeedbackFlags::from).unwrap_or_default();
    let after = apply_toggle(before, kind, desired);

    let feedback = sqlx::query_as::<_, ProductFeedback>(
        "INSERT INTO product_feedback (product_id, user_id, up_voted, down_voted, used)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (product_id, user_id) DO UPDATE
         SET up_voted = $3, down_voted = $4, used = $5, updated_at = NOW()
         RETURNING *",
    )
    .bind(product_id)
    .bind(user_id)
    .bind(after.up_voted)
    .bind(after.down_voted)
    .bind(after.used)
    .fetch_one(pool)
    .await?;

    let delta = counter_delta(before, after);

    let analytics = sqlx::query_as::<_, FeedbackAnalytics>(
        "INSERT INTO product_feedback_analytics (product_id, up_vote, down_vote, in_use)
         VALUES ($1, GREATEST(0, $2), GREATEST(0, $3), GREATEST(0, $4))
         ON CONFLICT (product_id) DO UPDATE
         SET up_vote = GREATEST(0, product_feedback_analytics.up_vote + $2),
             down_vote = GREATEST(0, product_feedback_analytics.down_vote + $3),
             in_use = GREATEST(0, product_feedback_analytics.in_use + $4),
             updated_at = NOW()
         RETURNING *",
    )
    .bind(product_id)
    .bind(delta.up_vote)
    .bind(delta.down_vote)
    .bind(delta.in_use)
    .fetch_one(pool)
    .await?;

    tracing::debug!(
        "Feedback recorded for product {} by user {}: up={} down={} used={}",
        product_id,
        user_id,
        after.up_voted,
        after.down_voted,
        after.used
    );

    Ok((feedback, analytics))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(up: bool, down: bool, used: bool) -> FeedbackFlags {
        FeedbackFlags {
            up_voted: up,
            down_voted: down,
            used,
        }
    }

    #[test]
    fn test_first_upvote() {
        let after = apply_toggle(FeedbackFlags::default(), FeedbackKind::UpVote, true);
        assert_eq!(after, flags(true, false, false));

        let delta = counter_delta(FeedbackFlags::default(), after);
        assert_eq!(
            delta,
            CounterDelta {
                up_vote: 1,
                down_vote: 0,
                in_use: 0
            }
        );
    }

    #[test]
    fn test_upvote_and_downvote_never_both_set() {
        // Exhaust every starting state against every toggle.
        for up in [false, true] {
            for down in [false, true] {
                for used in [false, true] {
                    let start = flags(up && !down, down && !up, used);
                    for kind in [FeedbackKind::UpVote, FeedbackKind::DownVote, FeedbackKind::Used] {
                        for desired in [false, true] {
                            let after = apply_toggle(start, kind, desired);
                            assert!(
                                !(after.up_voted && after.down_voted),
                                "both votes set after {:?} -> {:?} {:?}",
                                start,
                                kind,
                                desired
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_downvote_flips_existing_upvote() {
        let start = flags(true, false, false);
        let after = apply_toggle(start, FeedbackKind::DownVote, true);
        assert_eq!(after, flags(false, true, false));

        // Both counters move in the same call.
        let delta = counter_delta(start, after);
        assert_eq!(
            delta,
            CounterDelta {
                up_vote: -1,
                down_vote: 1,
                in_use: 0
            }
        );
    }

    #[test]
    fn test_toggle_is_idempotent() {
        let once = apply_toggle(FeedbackFlags::default(), FeedbackKind::UpVote, true);
        let twice = apply_toggle(once, FeedbackKind::UpVote, true);
        assert_eq!(once, twice);

        // The repeat produces a zero delta, so counters stay put.
        assert_eq!(counter_delta(once, twice), CounterDelta::default());
    }

    #[test]
    fn test_upvote_round_trip_returns_to_start() {
        let start = flags(false, false, true);
        let voted = apply_toggle(start, FeedbackKind::UpVote, true);
        let reverted = apply_toggle(voted, FeedbackKind::UpVote, false);
        assert_eq!(reverted, start);

        let up = counter_delta(start, voted).up_vote + counter_delta(voted, reverted).up_vote;
        assert_eq!(up, 0);
    }

    #[test]
    fn test_used_is_independent_of_votes() {
        let start = flags(true, false, false);
        let after = apply_toggle(start, FeedbackKind::Used, true);
        assert_eq!(after, flags(true, false, true));

        let delta = counter_delta(start, after);
        assert_eq!(
            delta,
            CounterDelta {
                up_vote: 0,
                down_vote: 0,
                in_use: 1
            }
        );
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(FeedbackKind::parse("upvote"), Some(FeedbackKind::UpVote));
        assert_eq!(FeedbackKind::parse("downvote"), Some(FeedbackKind::DownVote));
        assert_eq!(FeedbackKind::parse("used"), Some(FeedbackKind::Used));
        assert_eq!(FeedbackKind::parse("like"), None);
    }

    #[test]
    fn test_counters_track_flag_counts_over_sequences() {
        // Simulated counters driven only by deltas must equal the flag
        // population after any sequence of toggles by a single user.
        let sequence = [
            (FeedbackKind::UpVote, true),
            (FeedbackKind::DownVote, true),
            (FeedbackKind::Used, true),
            (FeedbackKind::DownVote, false),
            (FeedbackKind::UpVote, true),
            (FeedbackKind::Used, false),
            (FeedbackKind::UpVote, false),
        ];

        let mut state = FeedbackFlags::default();
        let (mut up, mut down, mut used) = (0i32, 0i32, 0i32);
        for (kind, desired) in sequence {
            let next = apply_toggle(state, kind, desired);
            let delta = counter_delta(state, next);
            up += delta.up_vote;
            down += delta.down_vote;
            used += delta.in_use;
            state = next;

            assert_eq!(up, state.up_voted as i32);
            assert_eq!(down, state.down_voted as i32);
            assert_eq!(used, state.used as i32);
            assert!(up >= 0 && down >= 0 && used >= 0);
        }
    }
}
