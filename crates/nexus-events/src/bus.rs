//! Event bus: bounded publish intake, per-subscription FIFO delivery.
//!
//! Publishing stamps the event and enqueues it into a bounded intake
//! queue; a full intake fails fast so the caller decides retry or drop. A
//! dispatcher task fans events out to bounded per-subscription queues,
//! each drained by its own worker, so one subscriber's slowness or panic
//! never reaches the others.

use crate::event::Event;
use crate::pattern::EventPattern;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use nexus_config::schema::EventBusSection;
use nexus_config::ConfigService;
use nexus_core::error::{Error, Result};
use nexus_core::manager::{Manager, ManagerState, ManagerStatus};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Async callback invoked with each matching event
pub type EventHandler = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure into an [`EventHandler`]
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |event| f(event).boxed())
}

/// Per-subscription options
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Skip events whose `source` equals this subscription's subscriber id
    pub ignore_own_events: bool,
}

struct Subscription {
    subscriber_id: String,
    pattern: EventPattern,
    ignore_own: bool,
    tx: mpsc::Sender<Arc<Event>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

type SubKey = (String, String);

struct BusInner {
    subscriptions: RwLock<HashMap<SubKey, Arc<Subscription>>>,
    intake_tx: RwLock<Option<mpsc::Sender<Arc<Event>>>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

/// Topic publish/subscribe bus
pub struct EventBus {
    state: ManagerState,
    config: Arc<ConfigService>,
    inner: Arc<BusInner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    pub fn new(config: Arc<ConfigService>) -> Arc<Self> {
        Arc::new(Self {
            state: ManagerState::new("event_bus_manager"),
            config,
            inner: Arc::new(BusInner {
                subscriptions: RwLock::new(HashMap::new()),
                intake_tx: RwLock::new(None),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            dispatcher: Mutex::new(None),
        })
    }

    /// Subscribe a handler under a subscriber id.
    ///
    /// Re-subscribing the same `(subscriber_id, pattern)` replaces the
    /// previous registration, so duplicate registration never causes
    /// duplicate delivery.
    pub fn subscribe(
        &self,
        pattern: &str,
        subscriber_id: &str,
        callback: EventHandler,
    ) -> Result<()> {
        self.subscribe_with(pattern, subscriber_id, callback, SubscribeOptions::default())
    }

    pub fn subscribe_with(
        &self,
        pattern: &str,
        subscriber_id: &str,
        callback: EventHandler,
        options: SubscribeOptions,
    ) -> Result<()> {
        let section: EventBusSection = self.config.section("event_bus")?;
        let queue_size = section.max_queue_size.max(1);

        let (tx, mut rx) = mpsc::channel::<Arc<Event>>(queue_size);
        let sub = Arc::new(Subscription {
            subscriber_id: subscriber_id.to_string(),
            pattern: EventPattern::parse(pattern),
            ignore_own: options.ignore_own_events,
            tx,
            worker: Mutex::new(None),
        });

        let worker_id = subscriber_id.to_string();
        let worker_pattern = pattern.to_string();
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let outcome = std::panic::AssertUnwindSafe(callback(event.clone()))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!(
                            subscriber = %worker_id,
                            event_type = %event.event_type,
                            error = %e,
                            "Event handler failed"
                        );
                    }
                    Err(_) => {
                        tracing::error!(
                            subscriber = %worker_id,
                            pattern = %worker_pattern,
                            event_type = %event.event_type,
                            "Event handler panicked"
                        );
                    }
                }
            }
        });
        *sub.worker.lock() = Some(worker);

        let key: SubKey = (subscriber_id.to_string(), sub.pattern.as_string());
        let previous = self.inner.subscriptions.write().insert(key, sub);
        if let Some(previous) = previous {
            if let Some(worker) = previous.worker.lock().take() {
                worker.abort();
            }
        }
        Ok(())
    }

    /// Remove every subscription registered under a subscriber id
    pub fn unsubscribe(&self, subscriber_id: &str) {
        let removed: Vec<Arc<Subscription>> = {
            let mut subs = self.inner.subscriptions.write();
            let keys: Vec<SubKey> = subs
                .keys()
                .filter(|(id, _)| id == subscriber_id)
                .cloned()
                .collect();
            keys.into_iter().filter_map(|k| subs.remove(&k)).collect()
        };
        for sub in removed {
            if let Some(worker) = sub.worker.lock().take() {
                worker.abort();
            }
        }
    }

    /// Publish an event. Non-blocking: fails fast with
    /// [`Error::EventBusFull`] when the intake buffer is full.
    pub fn publish(
        &self,
        event_type: &str,
        source: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid> {
        if !self.state.initialized() {
            return Err(Error::application("event bus is not running"));
        }
        let event = Arc::new(Event::new(event_type, source, payload));
        let event_id = event.event_id;

        let guard = self.inner.intake_tx.read();
        let Some(tx) = guard.as_ref() else {
            return Err(Error::application("event bus is not running"));
        };
        match tx.try_send(event) {
            Ok(()) => {
                self.inner.published.fetch_add(1, Ordering::SeqCst);
                tracing::trace!(event_type, source, %event_id, "Published event");
                Ok(event_id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(Error::EventBusFull),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::application("event bus is shutting down"))
            }
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }
}

#[async_trait]
impl Manager for EventBus {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn initialize(&self) -> Result<()> {
        let section: EventBusSection = self.config.section("event_bus")?;
        let queue_size = section.max_queue_size.max(1);
        let send_timeout = Duration::from_secs_f64(section.publish_timeout.max(0.1));

        let (tx, mut rx) = mpsc::channel::<Arc<Event>>(queue_size);
        *self.inner.intake_tx.write() = Some(tx);

        let inner = self.inner.clone();
        let dispatcher = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let matching: Vec<Arc<Subscription>> = {
                    let subs = inner.subscriptions.read();
                    subs.values()
                        .filter(|sub| sub.pattern.matches(&event.event_type))
                        .filter(|sub| !(sub.ignore_own && sub.subscriber_id == event.source))
                        .cloned()
                        .collect()
                };
                for sub in matching {
                    match tokio::time::timeout(send_timeout, sub.tx.send(event.clone())).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => {}
                        Err(_) => {
                            inner.dropped.fetch_add(1, Ordering::SeqCst);
                            tracing::warn!(
                                subscriber = %sub.subscriber_id,
                                event_type = %event.event_type,
                                "Subscriber queue full, dropping event for this subscriber"
                            );
                        }
                    }
                }
            }
        });
        *self.dispatcher.lock() = Some(dispatcher);

        self.state.set_ready();
        tracing::info!(queue_size, "Event bus initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.state.initialized() {
            return Ok(());
        }
        self.state.set_down();

        // Stop intake; the dispatcher drains what is already queued
        self.inner.intake_tx.write().take();
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            if tokio::time::timeout(Duration::from_secs(5), dispatcher)
                .await
                .is_err()
            {
                tracing::warn!("Event dispatcher did not drain in time");
            }
        }

        let subs: Vec<Arc<Subscription>> = {
            let mut map = self.inner.subscriptions.write();
            map.drain().map(|(_, sub)| sub).collect()
        };
        for sub in subs {
            let worker = sub.worker.lock().take();
            drop(sub);
            if let Some(worker) = worker {
                if tokio::time::timeout(Duration::from_secs(2), worker)
                    .await
                    .is_err()
                {
                    tracing::warn!("Event worker did not finish in time");
                }
            }
        }
        Ok(())
    }

    fn status(&self) -> ManagerStatus {
        self.state.status().with_details(serde_json::json!({
            "subscriptions": self.subscription_count(),
            "published": self.inner.published.load(Ordering::SeqCst),
            "dropped_deliveries": self.inner.dropped.load(Ordering::SeqCst),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    async fn bus() -> Arc<EventBus> {
        let config = Arc::new(ConfigService::new(None));
        config.initialize().await.unwrap();
        let bus = EventBus::new(config);
        bus.initialize().await.unwrap();
        bus
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_publish_and_deliver() {
        let bus = bus().await;
        let count = Arc::new(AtomicU32::new(0));
        let count_cb = count.clone();
        bus.subscribe(
            "test/topic",
            "sub1",
            handler(move |_| {
                let c = count_cb.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();

        let id = bus
            .publish("test/topic", "tester", serde_json::json!({}))
            .unwrap();
        assert!(!id.is_nil());
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_wildcard_and_prefix_subscriptions() {
        let bus = bus().await;
        let all = Arc::new(AtomicU32::new(0));
        let security = Arc::new(AtomicU32::new(0));

        let all_cb = all.clone();
        bus.subscribe(
            "*",
            "catcher",
            handler(move |_| {
                let c = all_cb.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();

        let sec_cb = security.clone();
        bus.subscribe(
            "security/*",
            "sec-watch",
            handler(move |_| {
                let c = sec_cb.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();

        bus.publish("security/user_login", "sec", serde_json::json!({}))
            .unwrap();
        bus.publish("monitoring/alert", "mon", serde_json::json!({}))
            .unwrap();
        settle().await;

        assert_eq!(all.load(Ordering::SeqCst), 2);
        assert_eq!(security.load(Ordering::SeqCst), 1);
        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_fifo_per_subscription() {
        let bus = bus().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        bus.subscribe(
            "seq/topic",
            "ordered",
            handler(move |event| {
                let seen = seen_cb.clone();
                async move {
                    seen.lock().push(event.payload["n"].as_i64().unwrap());
                    Ok(())
                }
            }),
        )
        .unwrap();

        for n in 0..20 {
            bus.publish("seq/topic", "tester", serde_json::json!({ "n": n }))
                .unwrap();
        }
        settle().await;
        assert_eq!(*seen.lock(), (0..20).collect::<Vec<i64>>());
        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_affect_others() {
        let bus = bus().await;
        let healthy = Arc::new(AtomicU32::new(0));

        bus.subscribe(
            "mix/topic",
            "broken",
            handler(move |_| async move { Err(Error::application("handler exploded")) }),
        )
        .unwrap();

        let healthy_cb = healthy.clone();
        bus.subscribe(
            "mix/topic",
            "healthy",
            handler(move |_| {
                let c = healthy_cb.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();

        for _ in 0..3 {
            bus.publish("mix/topic", "tester", serde_json::json!({}))
                .unwrap();
        }
        settle().await;
        assert_eq!(healthy.load(Ordering::SeqCst), 3);
        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_resubscribe_is_idempotent() {
        let bus = bus().await;
        let count = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let count_cb = count.clone();
            bus.subscribe(
                "dup/topic",
                "same-sub",
                handler(move |_| {
                    let c = count_cb.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .unwrap();
        }
        assert_eq!(bus.subscription_count(), 1);

        bus.publish("dup/topic", "tester", serde_json::json!({}))
            .unwrap();
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_all_for_subscriber() {
        let bus = bus().await;
        let count = Arc::new(AtomicU32::new(0));
        let count_cb = count.clone();
        bus.subscribe(
            "gone/topic",
            "leaver",
            handler(move |_| {
                let c = count_cb.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();

        bus.unsubscribe("leaver");
        assert_eq!(bus.subscription_count(), 0);

        bus.publish("gone/topic", "tester", serde_json::json!({}))
            .unwrap();
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_ignore_own_events() {
        let bus = bus().await;
        let count = Arc::new(AtomicU32::new(0));
        let count_cb = count.clone();
        bus.subscribe_with(
            "own/topic",
            "selfish",
            handler(move |_| {
                let c = count_cb.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            SubscribeOptions {
                ignore_own_events: true,
            },
        )
        .unwrap();

        bus.publish("own/topic", "selfish", serde_json::json!({}))
            .unwrap();
        bus.publish("own/topic", "other", serde_json::json!({}))
            .unwrap();
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        bus.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_backpressure_fails_fast() {
        let config = Arc::new(ConfigService::new(None));
        config.initialize().await.unwrap();
        config
            .set("event_bus.max_queue_size", serde_json::json!(2))
            .unwrap();
        config
            .set("event_bus.publish_timeout", serde_json::json!(30.0))
            .unwrap();
        let bus = EventBus::new(config);
        bus.initialize().await.unwrap();

        // A subscriber that never finishes its first delivery
        let stall = Arc::new(Notify::new());
        let stall_cb = stall.clone();
        bus.subscribe(
            "flood/topic",
            "stuck",
            handler(move |_| {
                let gate = stall_cb.clone();
                async move {
                    gate.notified().await;
                    Ok(())
                }
            }),
        )
        .unwrap();

        let mut saw_full = false;
        for _ in 0..20 {
            match bus.publish("flood/topic", "tester", serde_json::json!({})) {
                Ok(_) => tokio::time::sleep(Duration::from_millis(10)).await,
                Err(Error::EventBusFull) => {
                    saw_full = true;
                    break;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(saw_full, "publish never reported backpressure");
        stall.notify_waiters();
    }

    #[tokio::test]
    async fn test_publish_before_initialize_fails() {
        let config = Arc::new(ConfigService::new(None));
        config.initialize().await.unwrap();
        let bus = EventBus::new(config);
        assert!(bus
            .publish("early/topic", "tester", serde_json::json!({}))
            .is_err());
    }
}
