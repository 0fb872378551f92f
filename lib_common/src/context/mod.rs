//! Multi-tenant cache of rendered network context for API consumers.
//!
//! A tenant is a logical network namespace; legacy single-network
//! deployments use the reserved default tenant. Each tenant's rendered
//! context is cached under a TTL, and a per-tenant availability state
//! machine decides whether a miss should wait for first data or fail fast
//! with a placeholder.

mod cache;
mod format;

pub use cache::{
    Availability, CacheStatus, ContextCache, SnapshotSource, TenantKey, TenantStatus,
    DEFAULT_CACHE_TTL_SECONDS, DEFAULT_MAX_WAIT_ATTEMPTS, DEFAULT_POLL_INTERVAL_SECONDS,
};
pub use format::{render_snapshot, ContextSummary};
