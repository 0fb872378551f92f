use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::events::{MetricsEvent, MetricsEventType, KEY_LAST_SNAPSHOT};
use crate::models::events::{CHANNEL_HEALTH, CHANNEL_SPEED_TEST, CHANNEL_TOPOLOGY};
use crate::models::topology::{SpeedTestMetrics, TopologySnapshot};

/// How long the durable last snapshot survives without a refresh.
pub const DEFAULT_SNAPSHOT_TTL_SECONDS: u64 = 3600;

/// Token returned by [`RedisStore::add_handler`], used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&MetricsEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
struct HandlerEntry {
    id: HandlerId,
    callback: Handler,
}

type HandlerMap = HashMap<String, Vec<HandlerEntry>>;

/// Publisher/subscriber over the shared Redis instance.
///
/// Publishing is best-effort telemetry, not a correctness-critical write
/// path: a dead connection flips an internal disconnected flag, every
/// operation checks the flag and attempts a single reconnect, and continued
/// failure comes back as `false` rather than an error. Retry cadence is the
/// caller's concern.
#[derive(Clone)]
pub struct RedisStore {
    url: String,
    client: redis::Client,
    conn: Arc<Mutex<Option<MultiplexedConnection>>>,
    handlers: Arc<StdMutex<HandlerMap>>,
    subscribed: Arc<StdMutex<BTreeSet<String>>>,
    listener: Arc<Mutex<Option<(CancellationToken, JoinHandle<()>)>>>,
    next_handler_id: Arc<AtomicU64>,
    snapshot_ttl_seconds: u64,
}

impl RedisStore {
    /// Fails fast on a malformed URL; the actual connection is made by
    /// [`connect`](Self::connect) or lazily on first use.
    pub fn new(url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            url: url.to_string(),
            client,
            conn: Arc::new(Mutex::new(None)),
            handlers: Arc::new(StdMutex::new(HashMap::new())),
            subscribed: Arc::new(StdMutex::new(BTreeSet::new())),
            listener: Arc::new(Mutex::new(None)),
            next_handler_id: Arc::new(AtomicU64::new(1)),
            snapshot_ttl_seconds: DEFAULT_SNAPSHOT_TTL_SECONDS,
        })
    }

    pub fn with_snapshot_ttl(mut self, seconds: u64) -> Self {
        self.snapshot_ttl_seconds = seconds;
        self
    }

    /// Establish (or re-establish) the connection. Returns `true` on success.
    pub async fn connect(&self) -> bool {
        let mut guard = self.conn.lock().await;
        match self.client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                let pong: redis::RedisResult<String> =
                    redis::cmd("PING").query_async(&mut conn).await;
                match pong {
                    Ok(_) => {
                        log::info!("Connected to Redis at {}", self.url);
                        *guard = Some(conn);
                        true
                    }
                    Err(e) => {
                        log::error!("Redis ping failed: {}", e);
                        *guard = None;
                        false
                    }
                }
            }
            Err(e) => {
                log::error!("Failed to connect to Redis: {}", e);
                *guard = None;
                false
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// One reconnect attempt when the disconnected flag is set, then give up.
    async fn ensure_connected(&self) -> Option<MultiplexedConnection> {
        {
            let guard = self.conn.lock().await;
            if let Some(conn) = guard.as_ref() {
                return Some(conn.clone());
            }
        }
        if self.connect().await {
            self.conn.lock().await.clone()
        } else {
            None
        }
    }

    async fn mark_disconnected(&self) {
        *self.conn.lock().await = None;
    }

    /// Publish an event to a channel. Returns `true` if the message reached
    /// the server; `false` on serialization or connection failure.
    pub async fn publish(
        &self,
        channel: &str,
        event_type: MetricsEventType,
        payload: serde_json::Value,
    ) -> bool {
        let Some(mut conn) = self.ensure_connected().await else {
            log::warn!("Cannot publish to {}: not connected to Redis", channel);
            return false;
        };

        let event = MetricsEvent::new(event_type, payload);
        let message = match serde_json::to_string(&event) {
            Ok(message) => message,
            Err(e) => {
                log::error!("Failed to serialize event for {}: {}", channel, e);
                return false;
            }
        };

        let published: redis::RedisResult<i64> = conn.publish(channel, message).await;
        match published {
            Ok(subscribers) => {
                log::debug!("Published {:?} to {} ({} subscribers)", event.event_type, channel, subscribers);
                true
            }
            Err(e) => {
                log::error!("Failed to publish to {}: {}", channel, e);
                self.mark_disconnected().await;
                false
            }
        }
    }

    /// Publish a full topology snapshot on the topology channel.
    pub async fn publish_topology_snapshot(&self, snapshot: &TopologySnapshot) -> bool {
        let payload = match serde_json::to_value(snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Failed to serialize snapshot: {}", e);
                return false;
            }
        };
        self.publish(CHANNEL_TOPOLOGY, MetricsEventType::FullSnapshot, payload).await
    }

    /// Publish a health status change for a single node.
    pub async fn publish_health_update(
        &self,
        node_id: &str,
        status: &str,
        metrics: serde_json::Value,
    ) -> bool {
        let payload = serde_json::json!({
            "node_id": node_id,
            "status": status,
            "metrics": metrics,
        });
        self.publish(CHANNEL_HEALTH, MetricsEventType::HealthUpdate, payload).await
    }

    /// Publish a speed test result for a gateway.
    pub async fn publish_speed_test_result(
        &self,
        gateway_ip: &str,
        result: &SpeedTestMetrics,
    ) -> bool {
        let payload = match serde_json::to_value(result) {
            Ok(result) => serde_json::json!({ "gateway_ip": gateway_ip, "result": result }),
            Err(e) => {
                log::error!("Failed to serialize speed test result: {}", e);
                return false;
            }
        };
        self.publish(CHANNEL_SPEED_TEST, MetricsEventType::SpeedTestResult, payload).await
    }

    /// Persist the most recent snapshot under a well-known key with a bounded
    /// expiry, so a newly started subscriber has something to read before the
    /// next publish cycle.
    pub async fn store_last_snapshot(&self, snapshot: &TopologySnapshot) -> bool {
        let Some(mut conn) = self.ensure_connected().await else {
            return false;
        };
        let json = match serde_json::to_string(snapshot) {
            Ok(json) => json,
            Err(e) => {
                log::error!("Failed to serialize snapshot: {}", e);
                return false;
            }
        };
        let stored: redis::RedisResult<()> =
            conn.set_ex(KEY_LAST_SNAPSHOT, json, self.snapshot_ttl_seconds).await;
        match stored {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to store snapshot: {}", e);
                self.mark_disconnected().await;
                false
            }
        }
    }

    /// Fetch the durable last snapshot, if one is stored and unexpired.
    /// A corrupt stored blob is logged and treated as absent.
    pub async fn get_last_snapshot(&self) -> Option<TopologySnapshot> {
        let Some(mut conn) = self.ensure_connected().await else {
            return None;
        };
        let raw: redis::RedisResult<Option<String>> = conn.get(KEY_LAST_SNAPSHOT).await;
        match raw {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    log::warn!("Stored snapshot is not parseable, ignoring it: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                log::error!("Failed to get last snapshot: {}", e);
                self.mark_disconnected().await;
                None
            }
        }
    }

    /// Register a callback for messages arriving on `channel`. Handlers run
    /// in arrival order on the single listener task; a failing handler is
    /// logged and does not stop delivery to the others.
    pub fn add_handler<F>(&self, channel: &str, handler: F) -> HandlerId
    where
        F: Fn(&MetricsEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .expect("handler lock poisoned")
            .entry(channel.to_string())
            .or_default()
            .push(HandlerEntry { id, callback: Arc::new(handler) });
        id
    }

    pub fn remove_handler(&self, channel: &str, id: HandlerId) {
        if let Some(entries) = self.handlers.lock().expect("handler lock poisoned").get_mut(channel)
        {
            entries.retain(|entry| entry.id != id);
        }
    }

    /// Subscribe to one or more channels. (Re)spawns the listener so that
    /// exactly one background task serves the subscription set.
    pub async fn subscribe(&self, channels: &[&str]) -> bool {
        {
            let mut subscribed = self.subscribed.lock().expect("subscription lock poisoned");
            for channel in channels {
                subscribed.insert((*channel).to_string());
            }
        }
        self.restart_listener().await
    }

    pub async fn unsubscribe(&self, channels: &[&str]) -> bool {
        {
            let mut subscribed = self.subscribed.lock().expect("subscription lock poisoned");
            for channel in channels {
                subscribed.remove(*channel);
            }
        }
        self.restart_listener().await
    }

    async fn restart_listener(&self) -> bool {
        self.stop_listener().await;

        let channels: Vec<String> = {
            let subscribed = self.subscribed.lock().expect("subscription lock poisoned");
            subscribed.iter().cloned().collect()
        };
        if channels.is_empty() {
            return true;
        }

        let mut pubsub = match self.client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                log::error!("Failed to open pub/sub connection: {}", e);
                return false;
            }
        };
        if let Err(e) = pubsub.subscribe(&channels).await {
            log::error!("Failed to subscribe: {}", e);
            return false;
        }
        log::info!("Subscribed to channels: {}", channels.join(", "));

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handlers = Arc::clone(&self.handlers);
        let handle = tokio::spawn(async move {
            log::info!("Starting Redis message listener");
            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        log::info!("Message listener cancelled");
                        break;
                    }
                    msg = stream.next() => {
                        match msg {
                            Some(msg) => dispatch_message(&handlers, &msg),
                            None => {
                                log::warn!("Redis pub/sub stream closed");
                                break;
                            }
                        }
                    }
                }
            }
        });

        *self.listener.lock().await = Some((cancel, handle));
        true
    }

    async fn stop_listener(&self) {
        if let Some((cancel, handle)) = self.listener.lock().await.take() {
            cancel.cancel();
            let _ = handle.await;
        }
    }

    /// Idempotent teardown: cancels the listener, drops the subscription and
    /// the connection. Safe to call from shutdown even if connect never
    /// succeeded.
    pub async fn disconnect(&self) {
        self.stop_listener().await;
        *self.conn.lock().await = None;
        log::info!("Disconnected from Redis");
    }

    /// Connection details for operational introspection.
    pub async fn connection_info(&self) -> serde_json::Value {
        let channels: Vec<String> = {
            let handlers = self.handlers.lock().expect("handler lock poisoned");
            handlers.keys().cloned().collect()
        };
        serde_json::json!({
            "url": self.url,
            "connected": self.is_connected().await,
            "channels": channels,
        })
    }
}

fn dispatch_message(handlers: &StdMutex<HandlerMap>, msg: &redis::Msg) {
    let channel = msg.get_channel_name().to_string();
    let payload: String = match msg.get_payload() {
        Ok(payload) => payload,
        Err(e) => {
            log::warn!("Non-text message on {}: {}", channel, e);
            return;
        }
    };
    let event: MetricsEvent = match serde_json::from_str(&payload) {
        Ok(event) => event,
        Err(e) => {
            log::warn!("Failed to parse message on {}: {}", channel, e);
            return;
        }
    };
    dispatch_event(handlers, &channel, &event);
}

fn dispatch_event(handlers: &StdMutex<HandlerMap>, channel: &str, event: &MetricsEvent) {
    let entries: Vec<HandlerEntry> = {
        let map = handlers.lock().expect("handler lock poisoned");
        map.get(channel).cloned().unwrap_or_default()
    };
    for entry in entries {
        if let Err(e) = (entry.callback)(event) {
            log::error!("Handler error for {}: {}", channel, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::events::MetricsEventType;
    use std::sync::atomic::AtomicUsize;

    fn store() -> RedisStore {
        // Never connected in unit tests; the registry is purely in-process.
        RedisStore::new("redis://127.0.0.1:6379/").unwrap()
    }

    fn sample_event() -> MetricsEvent {
        MetricsEvent::new(MetricsEventType::HealthUpdate, serde_json::json!({"node_id": "n1"}))
    }

    #[test]
    fn test_new_rejects_malformed_url() {
        assert!(RedisStore::new("not a url").is_err());
    }

    #[test]
    fn test_handlers_dispatch_in_registration_order() {
        let store = store();
        let seen = Arc::new(StdMutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            store.add_handler(CHANNEL_HEALTH, move |_event| {
                seen.lock().unwrap().push(tag);
                Ok(())
            });
        }

        dispatch_event(&store.handlers, CHANNEL_HEALTH, &sample_event());
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_handler_does_not_stop_delivery() {
        let store = store();
        let delivered = Arc::new(AtomicUsize::new(0));

        store.add_handler(CHANNEL_HEALTH, |_event| anyhow::bail!("handler exploded"));
        {
            let delivered = Arc::clone(&delivered);
            store.add_handler(CHANNEL_HEALTH, move |_event| {
                delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            });
        }

        dispatch_event(&store.handlers, CHANNEL_HEALTH, &sample_event());
        assert_eq!(delivered.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_remove_handler_deregisters_only_that_handler() {
        let store = store();
        let delivered = Arc::new(AtomicUsize::new(0));

        let removable = {
            let delivered = Arc::clone(&delivered);
            store.add_handler(CHANNEL_TOPOLOGY, move |_event| {
                delivered.fetch_add(10, Ordering::Relaxed);
                Ok(())
            })
        };
        {
            let delivered = Arc::clone(&delivered);
            store.add_handler(CHANNEL_TOPOLOGY, move |_event| {
                delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            });
        }

        store.remove_handler(CHANNEL_TOPOLOGY, removable);
        dispatch_event(&store.handlers, CHANNEL_TOPOLOGY, &sample_event());
        assert_eq!(delivered.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_dispatch_ignores_channels_without_handlers() {
        let store = store();
        // Must not panic or touch other channels.
        dispatch_event(&store.handlers, "metrics:unrelated", &sample_event());
    }

    #[tokio::test]
    async fn test_publish_is_false_not_a_panic_when_unreachable() {
        // Port 1 is never a Redis server: the single reconnect attempt
        // fails and publishing degrades to `false`.
        let store = RedisStore::new("redis://127.0.0.1:1/").unwrap();
        let published = store
            .publish(CHANNEL_HEALTH, MetricsEventType::HealthUpdate, serde_json::json!({}))
            .await;
        assert!(!published);
        assert!(store.get_last_snapshot().await.is_none());
        assert!(!store.is_connected().await);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_before_connect() {
        let store = store();
        store.disconnect().await;
        store.disconnect().await;
        assert!(!store.is_connected().await);
    }

    #[tokio::test]
    async fn test_connection_info_lists_handler_channels() {
        let store = store();
        store.add_handler(CHANNEL_TOPOLOGY, |_event| Ok(()));
        let info = store.connection_info().await;
        assert_eq!(info["connected"], false);
        assert!(info["channels"]
            .as_array()
            .unwrap()
            .iter()
            .any(|c| c == CHANNEL_TOPOLOGY));
    }
}
