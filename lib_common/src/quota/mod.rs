//! Atomic per-day request counters with role exemptions.
//!
//! Counters are keyed by `(subject, endpoint, local calendar day)` and
//! expire at the next midnight in the server's local timezone, so limits
//! reset when the operator's day rolls over, not at UTC midnight.

use std::collections::HashSet;

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

// Atomic: increment and set expiry only if first time. A single round-trip
// so two concurrent first requests cannot both (or neither) arm the expiry.
const INCR_EXPIRE_SCRIPT: &str = r#"
local v = redis.call('INCR', KEYS[1])
if v == 1 then
  redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return v
"#;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("daily limit exceeded ({limit}/day), retry in {retry_after_seconds}s")]
    Exceeded { limit: u32, retry_after_seconds: i64 },
    #[error("quota store error: {0}")]
    Store(#[from] redis::RedisError),
}

/// Read-only view of a subject's current quota usage.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub used: i64,
    /// -1 signals unlimited (exempt role).
    pub limit: i64,
    /// -1 signals unlimited (exempt role).
    pub remaining: i64,
    pub resets_in_seconds: i64,
    pub is_exempt: bool,
}

/// Role-aware daily request counter backed by the shared Redis instance.
pub struct QuotaLimiter {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    script: redis::Script,
    exempt_roles: HashSet<String>,
}

impl QuotaLimiter {
    /// `exempt_roles` is a comma-separated list (e.g. `"admin,owner"`);
    /// matching is case-insensitive. Fails fast on a malformed URL.
    pub fn new(url: &str, exempt_roles: &str) -> redis::RedisResult<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            conn: Mutex::new(None),
            script: redis::Script::new(INCR_EXPIRE_SCRIPT),
            exempt_roles: parse_exempt_roles(exempt_roles),
        })
    }

    pub fn is_role_exempt(&self, role: &str) -> bool {
        self.exempt_roles.contains(&role.to_lowercase())
    }

    async fn connection(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn drop_connection(&self) {
        *self.conn.lock().await = None;
    }

    /// Count one request against the subject's daily quota.
    ///
    /// Exempt roles return `Ok` without touching the counter at all. For
    /// everyone else the increment and the conditional expiry run as one
    /// server-side script; exceeding `daily_limit` yields
    /// [`QuotaError::Exceeded`] carrying the seconds until the local-midnight
    /// reset.
    pub async fn check_and_consume(
        &self,
        subject: &str,
        endpoint: &str,
        daily_limit: u32,
        role: Option<&str>,
    ) -> Result<(), QuotaError> {
        if role.is_some_and(|r| self.is_role_exempt(r)) {
            return Ok(());
        }

        let now = Local::now();
        let key = quota_key(subject, endpoint, &now);
        let ttl = seconds_until_midnight(&now);

        let mut conn = self.connection().await?;
        let count: i64 = match self.script.key(&key).arg(ttl).invoke_async(&mut conn).await {
            Ok(count) => count,
            Err(e) => {
                self.drop_connection().await;
                return Err(e.into());
            }
        };

        if count > i64::from(daily_limit) {
            log::info!(
                "Quota exceeded for {} on {} ({} > {}/day)",
                subject,
                endpoint,
                count,
                daily_limit
            );
            return Err(QuotaError::Exceeded { limit: daily_limit, retry_after_seconds: ttl });
        }
        Ok(())
    }

    /// Pure read of the current usage; never increments.
    pub async fn status(
        &self,
        subject: &str,
        endpoint: &str,
        daily_limit: u32,
        role: Option<&str>,
    ) -> Result<QuotaStatus, QuotaError> {
        if role.is_some_and(|r| self.is_role_exempt(r)) {
            return Ok(QuotaStatus {
                used: 0,
                limit: -1,
                remaining: -1,
                resets_in_seconds: 0,
                is_exempt: true,
            });
        }

        let now = Local::now();
        let key = quota_key(subject, endpoint, &now);
        let ttl = seconds_until_midnight(&now);

        let mut conn = self.connection().await?;
        let used: i64 = match conn.get::<_, Option<i64>>(&key).await {
            Ok(used) => used.unwrap_or(0),
            Err(e) => {
                self.drop_connection().await;
                return Err(e.into());
            }
        };

        Ok(QuotaStatus {
            used,
            limit: i64::from(daily_limit),
            remaining: (i64::from(daily_limit) - used).max(0),
            resets_in_seconds: ttl,
            is_exempt: false,
        })
    }
}

fn parse_exempt_roles(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|role| role.trim().to_lowercase())
        .filter(|role| !role.is_empty())
        .collect()
}

/// Counter key for one subject/endpoint on the calendar day of `now`.
/// Keys embed the day so they naturally partition; the expiry merely
/// garbage-collects them.
pub fn quota_key<Tz: TimeZone>(subject: &str, endpoint: &str, now: &DateTime<Tz>) -> String {
    format!("rl:{}:{}:{}", subject, endpoint, now.date_naive().format("%Y-%m-%d"))
}

/// Seconds until the next midnight in `now`'s timezone, never less than 1.
pub fn seconds_until_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> i64 {
    let midnight = (now.date_naive() + Days::new(1)).and_time(NaiveTime::MIN);
    (midnight - now.naive_local()).num_seconds().max(1)
}
