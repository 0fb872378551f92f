use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use super::format::{loading_context, render_snapshot, unavailable_context, ContextSummary};
use crate::models::topology::TopologySnapshot;

pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 30;
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;
pub const DEFAULT_MAX_WAIT_ATTEMPTS: u32 = 3;

/// Logical network namespace. The reserved default key serves legacy
/// single-network deployments and lives in the same maps as named tenants,
/// not on a parallel code path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantKey(Option<String>);

impl TenantKey {
    pub fn new(network_id: impl Into<String>) -> Self {
        Self(Some(network_id.into()))
    }

    /// The reserved single-network key.
    pub fn default_network() -> Self {
        Self(None)
    }

    pub fn network_id(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl From<Option<String>> for TenantKey {
    fn from(network_id: Option<String>) -> Self {
        Self(network_id)
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(network_id) => write!(f, "network {}", network_id),
            None => write!(f, "the default network"),
        }
    }
}

/// Whether a tenant has ever had a snapshot. `Unknown` means first data has
/// never arrived; `Unavailable` means data existed and the aggregator is
/// now failing. Cache expiry never changes this, only fetch outcomes and
/// explicit resets do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    #[default]
    Unknown,
    Available,
    Unavailable,
}

/// Boundary to the snapshot aggregator. `force_refresh` must request an
/// upstream regeneration rather than a pass-through of a stale cache.
/// Implementations are safe to call concurrently and repeatedly; an error
/// and an empty result are both "no snapshot right now".
pub trait SnapshotSource: Send + Sync {
    fn fetch_snapshot(
        &self,
        tenant: &TenantKey,
        force_refresh: bool,
    ) -> impl Future<Output = anyhow::Result<Option<TopologySnapshot>>> + Send;
}

struct CachedContext {
    text: String,
    summary: ContextSummary,
    produced_at: DateTime<Utc>,
}

/// Per-tenant status view.
#[derive(Debug, Clone, Serialize)]
pub struct TenantStatus {
    pub network_id: Option<String>,
    pub availability: Availability,
    pub cached: bool,
    pub cache_age_seconds: Option<i64>,
    pub last_check: Option<DateTime<Utc>>,
}

/// Whole-cache status view.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub cached_tenants: Vec<String>,
    pub available_tenants: Vec<String>,
    pub last_check: Option<DateTime<Utc>>,
}

/// TTL cache of rendered contexts with per-tenant availability tracking.
///
/// Lookups are reads over in-process maps. Regeneration for one tenant is
/// not single-flighted: concurrent refreshes are tolerated and the faster
/// completion wins, which is fine under the TTL contract.
pub struct ContextCache<S> {
    source: S,
    ttl: Duration,
    poll_interval: Duration,
    max_wait_attempts: u32,
    entries: Mutex<HashMap<TenantKey, CachedContext>>,
    availability: Mutex<HashMap<TenantKey, Availability>>,
    last_check: Mutex<Option<DateTime<Utc>>>,
}

impl<S: SnapshotSource> ContextCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECONDS),
            max_wait_attempts: DEFAULT_MAX_WAIT_ATTEMPTS,
            entries: Mutex::new(HashMap::new()),
            availability: Mutex::new(HashMap::new()),
            last_check: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_wait_attempts(mut self, attempts: u32) -> Self {
        self.max_wait_attempts = attempts;
        self
    }

    /// Build (or serve from cache) the rendered context for one tenant.
    ///
    /// `wait_for_data` bounds the blocking a first-time caller experiences
    /// while the aggregator warms up; a tenant that already had data fails
    /// fast instead of piling up on a known-degraded aggregator. Degraded
    /// paths return a placeholder, never an error, so callers can proceed
    /// gracefully without data.
    pub async fn get_context(
        &self,
        tenant: &TenantKey,
        wait_for_data: bool,
        force_refresh: bool,
    ) -> (String, ContextSummary) {
        if !force_refresh {
            let entries = self.entries.lock().await;
            if let Some(entry) = entries.get(tenant) {
                let age = (Utc::now() - entry.produced_at).num_seconds();
                if age >= 0 && (age as u64) < self.ttl.as_secs() {
                    return (entry.text.clone(), entry.summary.clone());
                }
            }
        }

        let mut snapshot = self.try_fetch(tenant, force_refresh).await;

        if snapshot.is_none()
            && wait_for_data
            && self.availability(tenant).await == Availability::Unknown
        {
            log::info!("No snapshot available yet for {}, waiting for the aggregator...", tenant);
            snapshot = self.wait_for_snapshot(tenant).await;
        }

        let Some(snapshot) = snapshot else {
            return self.degraded_context(tenant).await;
        };

        let (text, summary) = render_snapshot(&snapshot);
        let mut entries = self.entries.lock().await;
        entries.insert(
            tenant.clone(),
            CachedContext { text: text.clone(), summary: summary.clone(), produced_at: Utc::now() },
        );
        (text, summary)
    }

    /// One aggregator call. Success flips availability to `Available`;
    /// failure leaves it untouched here (the degraded path decides).
    async fn try_fetch(&self, tenant: &TenantKey, force_refresh: bool) -> Option<TopologySnapshot> {
        *self.last_check.lock().await = Some(Utc::now());
        match self.source.fetch_snapshot(tenant, force_refresh).await {
            Ok(Some(snapshot)) => {
                self.set_availability(tenant, Availability::Available).await;
                log::debug!("Fetched snapshot for {}", tenant);
                Some(snapshot)
            }
            Ok(None) => {
                log::info!("Snapshot not yet available for {}", tenant);
                None
            }
            Err(e) => {
                log::warn!("Error fetching snapshot for {}: {}", tenant, e);
                None
            }
        }
    }

    /// Bounded poll loop for a tenant that has never seen data. Sleeps
    /// cooperatively between attempts.
    async fn wait_for_snapshot(&self, tenant: &TenantKey) -> Option<TopologySnapshot> {
        for attempt in 1..=self.max_wait_attempts {
            tokio::time::sleep(self.poll_interval).await;
            if let Some(snapshot) = self.try_fetch(tenant, false).await {
                log::info!("Snapshot for {} available after {} attempt(s)", tenant, attempt);
                return Some(snapshot);
            }
            log::debug!(
                "Waiting for snapshot for {} (attempt {}/{})",
                tenant,
                attempt,
                self.max_wait_attempts
            );
        }
        log::warn!(
            "Snapshot for {} not available after {} attempts",
            tenant,
            self.max_wait_attempts
        );
        None
    }

    /// Placeholder selection once fetching (and any waiting) has failed.
    /// A tenant that never had data stays `Unknown` and gets the loading
    /// text; a tenant that had data transitions to `Unavailable`.
    async fn degraded_context(&self, tenant: &TenantKey) -> (String, ContextSummary) {
        if self.availability(tenant).await == Availability::Unknown {
            loading_context()
        } else {
            self.set_availability(tenant, Availability::Unavailable).await;
            unavailable_context()
        }
    }

    pub async fn availability(&self, tenant: &TenantKey) -> Availability {
        self.availability.lock().await.get(tenant).copied().unwrap_or_default()
    }

    async fn set_availability(&self, tenant: &TenantKey, state: Availability) {
        self.availability.lock().await.insert(tenant.clone(), state);
    }

    /// Evict cached contexts without touching availability.
    pub async fn clear_cache(&self, tenant: Option<&TenantKey>) {
        let mut entries = self.entries.lock().await;
        match tenant {
            Some(tenant) => {
                entries.remove(tenant);
            }
            None => entries.clear(),
        }
    }

    /// Evict cached contexts *and* forget availability; used for test
    /// isolation and manual recovery.
    pub async fn reset_state(&self, tenant: Option<&TenantKey>) {
        self.clear_cache(tenant).await;
        let mut availability = self.availability.lock().await;
        match tenant {
            Some(tenant) => {
                availability.remove(tenant);
            }
            None => availability.clear(),
        }
        *self.last_check.lock().await = None;
    }

    pub async fn tenant_status(&self, tenant: &TenantKey) -> TenantStatus {
        let cache_age_seconds = {
            let entries = self.entries.lock().await;
            entries.get(tenant).map(|entry| (Utc::now() - entry.produced_at).num_seconds())
        };
        TenantStatus {
            network_id: tenant.network_id().map(str::to_string),
            availability: self.availability(tenant).await,
            cached: cache_age_seconds.is_some(),
            cache_age_seconds,
            last_check: *self.last_check.lock().await,
        }
    }

    pub async fn status(&self) -> CacheStatus {
        let cached_tenants = {
            let entries = self.entries.lock().await;
            let mut keys: Vec<TenantKey> = entries.keys().cloned().collect();
            keys.sort();
            keys.iter().map(TenantKey::to_string).collect()
        };
        let available_tenants = {
            let availability = self.availability.lock().await;
            let mut keys: Vec<TenantKey> = availability
                .iter()
                .filter(|(_, state)| **state == Availability::Available)
                .map(|(key, _)| key.clone())
                .collect();
            keys.sort();
            keys.iter().map(TenantKey::to_string).collect()
        };
        CacheStatus { cached_tenants, available_tenants, last_check: *self.last_check.lock().await }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Source that replays a scripted sequence of fetch outcomes. Anything
    /// past the end of the script behaves as "no snapshot".
    struct ScriptedSource {
        calls: AtomicU32,
        outcomes: StdMutex<VecDeque<Option<TopologySnapshot>>>,
    }

    impl ScriptedSource {
        fn new(outcomes: Vec<Option<TopologySnapshot>>) -> Self {
            Self { calls: AtomicU32::new(0), outcomes: StdMutex::new(outcomes.into()) }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }

        fn push(&self, outcome: Option<TopologySnapshot>) {
            self.outcomes.lock().unwrap().push_back(outcome);
        }
    }

    impl SnapshotSource for &ScriptedSource {
        async fn fetch_snapshot(
            &self,
            _tenant: &TenantKey,
            _force_refresh: bool,
        ) -> anyhow::Result<Option<TopologySnapshot>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(self.outcomes.lock().unwrap().pop_front().flatten())
        }
    }

    fn snapshot() -> TopologySnapshot {
        TopologySnapshot {
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            network_id: Some("net-a".to_string()),
            nodes: HashMap::new(),
            gateways: vec![],
            connection_count: 0,
            total_nodes: 3,
            healthy_nodes: 3,
            degraded_nodes: 0,
            unhealthy_nodes: 0,
            unknown_nodes: 0,
        }
    }

    #[tokio::test]
    async fn test_second_call_within_ttl_hits_cache() {
        let source = ScriptedSource::new(vec![Some(snapshot())]);
        let cache = ContextCache::new(&source);
        let tenant = TenantKey::new("net-a");

        let (first, _) = cache.get_context(&tenant, false, false).await;
        let (second, _) = cache.get_context(&tenant, false, false).await;
        assert_eq!(first, second);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_always_fetches() {
        let source = ScriptedSource::new(vec![Some(snapshot()), Some(snapshot())]);
        let cache = ContextCache::new(&source);
        let tenant = TenantKey::new("net-a");

        cache.get_context(&tenant, false, false).await;
        cache.get_context(&tenant, false, true).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_tenants_are_cached_independently() {
        let source = ScriptedSource::new(vec![Some(snapshot()), Some(snapshot())]);
        let cache = ContextCache::new(&source);

        cache.get_context(&TenantKey::new("net-a"), false, false).await;
        cache.get_context(&TenantKey::default_network(), false, false).await;
        assert_eq!(source.calls(), 2);

        // Clearing one tenant leaves the other cached.
        cache.clear_cache(Some(&TenantKey::new("net-a"))).await;
        source.push(Some(snapshot()));
        cache.get_context(&TenantKey::new("net-a"), false, false).await;
        cache.get_context(&TenantKey::default_network(), false, false).await;
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_first_failure_returns_loading_and_stays_unknown() {
        let source = ScriptedSource::new(vec![None]);
        let cache = ContextCache::new(&source);
        let tenant = TenantKey::new("net-a");

        let (_, summary) = cache.get_context(&tenant, false, false).await;
        assert!(summary.loading);
        assert!(!summary.unavailable);
        assert_eq!(cache.availability(&tenant).await, Availability::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_first_data_succeeds_on_second_poll() {
        // Initial fetch fails, first poll fails, second poll succeeds.
        let source = ScriptedSource::new(vec![None, None, Some(snapshot())]);
        let cache = ContextCache::new(&source);
        let tenant = TenantKey::new("net-a");

        let (text, summary) = cache.get_context(&tenant, true, false).await;
        assert!(!summary.loading);
        assert!(text.contains("NETWORK TOPOLOGY INFORMATION"));
        assert_eq!(source.calls(), 3);
        assert_eq!(cache.availability(&tenant).await, Availability::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_attempts_are_bounded() {
        let source = ScriptedSource::new(vec![]);
        let cache = ContextCache::new(&source);
        let tenant = TenantKey::new("net-a");

        let (_, summary) = cache.get_context(&tenant, true, false).await;
        assert!(summary.loading);
        // Initial fetch plus DEFAULT_MAX_WAIT_ATTEMPTS polls, then give up.
        assert_eq!(source.calls(), 1 + DEFAULT_MAX_WAIT_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_previously_available_tenant_fails_fast() {
        let source = ScriptedSource::new(vec![Some(snapshot())]);
        let cache = ContextCache::new(&source);
        let tenant = TenantKey::new("net-a");

        cache.get_context(&tenant, true, false).await;
        assert_eq!(cache.availability(&tenant).await, Availability::Available);

        // Aggregator goes dark. Force past the cache: no poll loop may run
        // for a tenant that already had data.
        let (_, summary) = cache.get_context(&tenant, true, true).await;
        assert!(summary.unavailable);
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.availability(&tenant).await, Availability::Unavailable);

        // Still failing: placeholder again, still no retry-waiting.
        let (_, summary) = cache.get_context(&tenant, true, true).await;
        assert!(summary.unavailable);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_clear_cache_keeps_availability() {
        let source = ScriptedSource::new(vec![Some(snapshot())]);
        let cache = ContextCache::new(&source);
        let tenant = TenantKey::new("net-a");

        cache.get_context(&tenant, false, false).await;
        cache.clear_cache(None).await;
        assert_eq!(cache.availability(&tenant).await, Availability::Available);
        assert!(!cache.tenant_status(&tenant).await.cached);
    }

    #[tokio::test]
    async fn test_reset_state_forgets_availability() {
        let source = ScriptedSource::new(vec![Some(snapshot())]);
        let cache = ContextCache::new(&source);
        let tenant = TenantKey::new("net-a");

        cache.get_context(&tenant, false, false).await;
        cache.reset_state(Some(&tenant)).await;
        assert_eq!(cache.availability(&tenant).await, Availability::Unknown);
    }

    #[tokio::test]
    async fn test_status_views() {
        let source = ScriptedSource::new(vec![Some(snapshot())]);
        let cache = ContextCache::new(&source);
        let tenant = TenantKey::new("net-a");

        cache.get_context(&tenant, false, false).await;

        let tenant_status = cache.tenant_status(&tenant).await;
        assert_eq!(tenant_status.network_id.as_deref(), Some("net-a"));
        assert!(tenant_status.cached);
        assert_eq!(tenant_status.availability, Availability::Available);
        assert!(tenant_status.last_check.is_some());

        let status = cache.status().await;
        assert_eq!(status.cached_tenants, vec!["network net-a".to_string()]);
        assert_eq!(status.available_tenants, vec!["network net-a".to_string()]);
    }
}
