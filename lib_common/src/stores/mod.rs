//! Redis-backed snapshot distribution: best-effort pub/sub fan-out plus a
//! durable "last known good" snapshot for late subscribers.

mod redis_store;

pub use redis_store::{HandlerId, RedisStore, DEFAULT_SNAPSHOT_TTL_SECONDS};
