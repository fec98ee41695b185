use std::time::Duration;

use chrono::{DateTime, Utc};
use domain_intake_core::ErrorKind;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::is_sqlite_busy;

/// Single-statement conditional upsert over `users_rate_limit`.
///
/// `?1` user id, `?2` now (unix seconds), `?3` window length in seconds,
/// `?4` maximum attempts per window. A window is expired once
/// `now - last_access_ts >= window`. The conflict branch only runs when the
/// window expired or the quota is not exhausted; otherwise nothing is updated
/// and no row is returned.
const ACQUIRE_ATTEMPT_SQL: &str = "\
INSERT INTO users_rate_limit (the_user_id, last_access_ts, the_count) \
VALUES (?1, ?2, 1) \
ON CONFLICT(the_user_id) DO UPDATE SET \
    last_access_ts = CASE \
        WHEN ?2 - users_rate_limit.last_access_ts >= ?3 THEN ?2 \
        ELSE users_rate_limit.last_access_ts \
    END, \
    the_count = CASE \
        WHEN ?2 - users_rate_limit.last_access_ts >= ?3 THEN 1 \
        ELSE users_rate_limit.the_count + 1 \
    END \
WHERE ?2 - users_rate_limit.last_access_ts >= ?3 \
   OR users_rate_limit.the_count < ?4 \
RETURNING the_count";

/// Repository handling per-user attempt counters.
#[derive(Clone)]
pub struct RateLimitRepository {
    pool: SqlitePool,
}

impl RateLimitRepository {
    /// Wraps an existing pool. Prefer the accessor on [`crate::Database`], which
    /// guarantees the durability pragmas.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Atomically consumes one attempt, returning the new count or `None` when denied.
    pub async fn acquire_attempt(
        &self,
        user_id: i64,
        now_unix: i64,
        window_secs: i64,
        max_attempts: i64,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar(ACQUIRE_ATTEMPT_SQL)
            .bind(user_id)
            .bind(now_unix)
            .bind(window_secs)
            .bind(max_attempts)
            .fetch_optional(&self.pool)
            .await
    }

    /// Loads the counter row for a user.
    pub async fn find(&self, user_id: i64) -> Result<Option<UserRateLimitRecord>, sqlx::Error> {
        sqlx::query_as::<_, UserRateLimitRecord>(
            "SELECT the_user_id, last_access_ts, the_count FROM users_rate_limit WHERE the_user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }
}

/// Row stored in `users_rate_limit`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserRateLimitRecord {
    pub the_user_id: i64,
    pub last_access_ts: i64,
    pub the_count: i64,
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The attempt was counted; `attempt` is its 1-based position in the window.
    Allowed { attempt: u32 },
    Denied,
}

impl RateDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Fixed-quota limiter backed by the `users_rate_limit` table.
#[derive(Clone)]
pub struct RateLimiter {
    repo: RateLimitRepository,
    max_attempts: u32,
    window: Duration,
}

impl RateLimiter {
    /// Creates a limiter allowing `max_attempts` per `window` for each user.
    ///
    /// A zero quota is raised to one: the first attempt in a window is always counted.
    pub fn new(repo: RateLimitRepository, max_attempts: u32, window: Duration) -> Self {
        Self {
            repo,
            max_attempts: max_attempts.max(1),
            window,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decides whether `user_id` may submit at `now`, consuming an attempt when allowed.
    pub async fn can_pass(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, RateLimitError> {
        let window_secs = i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX);
        let count = self
            .repo
            .acquire_attempt(
                user_id,
                now.timestamp(),
                window_secs,
                i64::from(self.max_attempts),
            )
            .await
            .map_err(|err| {
                if is_sqlite_busy(&err) {
                    RateLimitError::Busy(err)
                } else {
                    RateLimitError::Database(err)
                }
            })?;

        Ok(match count {
            Some(count) => RateDecision::Allowed {
                attempt: u32::try_from(count).unwrap_or(u32::MAX),
            },
            None => RateDecision::Denied,
        })
    }
}

/// Errors that can occur while checking a user's quota.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("database is busy at the moment. try again later: {0}")]
    Busy(sqlx::Error),
    #[error("failed to query user rate limit counter: {0}")]
    Database(sqlx::Error),
}

impl RateLimitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Busy(_) => ErrorKind::StoreBusy,
            Self::Database(_) => ErrorKind::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_db;
    use chrono::TimeZone;

    const WINDOW: Duration = Duration::from_secs(60);

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    #[tokio::test]
    async fn first_attempt_creates_record() {
        let (db, _dir) = setup_db().await;
        let limiter = RateLimiter::new(db.rate_limits(), 3, WINDOW);

        let decision = limiter.can_pass(42, at(0)).await.expect("check");
        assert_eq!(decision, RateDecision::Allowed { attempt: 1 });

        let record = db.rate_limits().find(42).await.expect("find").expect("row");
        assert_eq!(
            record,
            UserRateLimitRecord {
                the_user_id: 42,
                last_access_ts: at(0).timestamp(),
                the_count: 1,
            }
        );
    }

    #[tokio::test]
    async fn allows_exactly_max_attempts_within_window() {
        let (db, _dir) = setup_db().await;
        let limiter = RateLimiter::new(db.rate_limits(), 3, WINDOW);

        for (offset, expected) in [(0, 1), (10, 2), (20, 3)] {
            let decision = limiter.can_pass(7, at(offset)).await.expect("check");
            assert_eq!(decision, RateDecision::Allowed { attempt: expected });
        }
        let decision = limiter.can_pass(7, at(30)).await.expect("check");
        assert_eq!(decision, RateDecision::Denied);

        let record = db.rate_limits().find(7).await.expect("find").expect("row");
        assert_eq!(record.the_count, 3, "count never exceeds the maximum");
        assert_eq!(record.last_access_ts, at(0).timestamp(), "window start is kept");
    }

    #[tokio::test]
    async fn denied_attempt_leaves_record_unchanged() {
        let (db, _dir) = setup_db().await;
        let limiter = RateLimiter::new(db.rate_limits(), 1, WINDOW);

        assert!(limiter.can_pass(1, at(0)).await.expect("check").is_allowed());
        let before = db.rate_limits().find(1).await.expect("find");
        for offset in [1, 5, 59] {
            assert_eq!(
                limiter.can_pass(1, at(offset)).await.expect("check"),
                RateDecision::Denied
            );
        }
        assert_eq!(db.rate_limits().find(1).await.expect("find"), before);
    }

    #[tokio::test]
    async fn window_expiry_is_inclusive_and_resets_count() {
        let (db, _dir) = setup_db().await;
        let limiter = RateLimiter::new(db.rate_limits(), 2, WINDOW);

        limiter.can_pass(9, at(0)).await.expect("check");
        limiter.can_pass(9, at(1)).await.expect("check");
        assert_eq!(
            limiter.can_pass(9, at(59)).await.expect("check"),
            RateDecision::Denied,
            "one second before expiry is still inside the window"
        );

        let decision = limiter.can_pass(9, at(60)).await.expect("check");
        assert_eq!(decision, RateDecision::Allowed { attempt: 1 });

        let record = db.rate_limits().find(9).await.expect("find").expect("row");
        assert_eq!(record.last_access_ts, at(60).timestamp());
        assert_eq!(record.the_count, 1);
    }

    #[tokio::test]
    async fn expiry_resets_window_even_before_quota_is_used() {
        let (db, _dir) = setup_db().await;
        let limiter = RateLimiter::new(db.rate_limits(), 5, WINDOW);

        limiter.can_pass(3, at(0)).await.expect("check");
        limiter.can_pass(3, at(30)).await.expect("check");
        let decision = limiter.can_pass(3, at(90)).await.expect("check");
        assert_eq!(decision, RateDecision::Allowed { attempt: 1 });

        let record = db.rate_limits().find(3).await.expect("find").expect("row");
        assert_eq!(record.last_access_ts, at(90).timestamp());
    }

    #[tokio::test]
    async fn users_are_counted_independently() {
        let (db, _dir) = setup_db().await;
        let limiter = RateLimiter::new(db.rate_limits(), 2, WINDOW);

        for offset in 0..2 {
            assert!(limiter.can_pass(100, at(offset)).await.expect("check").is_allowed());
            assert!(limiter.can_pass(200, at(offset)).await.expect("check").is_allowed());
        }
        assert!(!limiter.can_pass(100, at(3)).await.expect("check").is_allowed());
        assert!(!limiter.can_pass(200, at(3)).await.expect("check").is_allowed());
        assert!(limiter.can_pass(300, at(3)).await.expect("check").is_allowed());
    }

    #[tokio::test]
    async fn concurrent_attempts_never_exceed_quota() {
        let (db, _dir) = setup_db().await;
        let limiter = RateLimiter::new(db.rate_limits(), 5, WINDOW);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.can_pass(55, at(0)).await.expect("check")
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.expect("join").is_allowed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);

        let record = db.rate_limits().find(55).await.expect("find").expect("row");
        assert_eq!(record.the_count, 5);
    }

    #[tokio::test]
    async fn zero_quota_is_raised_to_one() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect_lazy("sqlite::memory:")
            .expect("lazy pool");
        let limiter = RateLimiter::new(RateLimitRepository::new(pool), 0, WINDOW);
        assert_eq!(limiter.max_attempts(), 1);
    }
}
