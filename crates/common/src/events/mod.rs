//! Task progress events and their fan-out
//!
//! A publish/subscribe registry keyed by task id. Delivery is best-effort:
//! sinks that fail are pruned, events for task ids nobody watches are dropped,
//! and late subscribers get no replay.

use crate::errors::{AppError, Result};
use crate::models::{FileStatus, TaskStatus};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;

/// Severity tag carried by `call_log` events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Info,
    Success,
    Warning,
    Error,
}

/// One event on a task's progress stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TaskEvent {
    CallLog {
        service: String,
        message: String,
        log_type: LogType,
        timestamp: String,
    },
    FileUpdate {
        file_name: String,
        status: FileStatus,
        download_url: Option<String>,
        files_done: usize,
        files_total: usize,
    },
    FinalResponse {
        status: TaskStatus,
        message: String,
        files_done: usize,
        files_total: usize,
    },
}

impl TaskEvent {
    pub fn log(service: impl Into<String>, message: impl Into<String>, log_type: LogType) -> Self {
        TaskEvent::CallLog {
            service: service.into(),
            message: message.into(),
            log_type,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, TaskEvent::FinalResponse { .. })
    }
}

/// A live receiver of task events
pub trait EventSink: Send + Sync {
    /// Hand one event to the subscriber. An error marks the sink as dead.
    fn deliver(&self, event: &TaskEvent) -> Result<()>;
}

/// Sink backed by an unbounded channel; fails once the receiver is dropped
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<TaskEvent>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<TaskEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: &TaskEvent) -> Result<()> {
        self.sender
            .send(event.clone())
            .map_err(|_| AppError::Internal {
                message: "subscriber channel closed".to_string(),
            })
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn subscribe(&self, task_id: &str, sink: Arc<dyn EventSink>) -> SubscriberId;

    async fn unsubscribe(&self, task_id: &str, subscriber: SubscriberId);

    /// Deliver to every sink registered for `task_id`. Never fails.
    async fn publish(&self, task_id: &str, event: TaskEvent);
}

/// Subscribe a fresh channel and return its receiving end
pub async fn subscribe_channel(
    bus: &dyn EventBus,
    task_id: &str,
) -> (SubscriberId, mpsc::UnboundedReceiver<TaskEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = bus.subscribe(task_id, Arc::new(ChannelSink::new(tx))).await;
    (id, rx)
}

type Registry = HashMap<String, Vec<(SubscriberId, Arc<dyn EventSink>)>>;

/// Process-local registry
#[derive(Default)]
pub struct InMemoryEventBus {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        // A poisoned registry still holds consistent entries
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of sinks registered for a task
    pub fn subscriber_count(&self, task_id: &str) -> usize {
        self.lock().get(task_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn subscribe(&self, task_id: &str, sink: Arc<dyn EventSink>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .entry(task_id.to_string())
            .or_default()
            .push((id, sink));
        debug!(task_id, subscriber = id.0, "Subscriber registered");
        id
    }

    async fn unsubscribe(&self, task_id: &str, subscriber: SubscriberId) {
        let mut registry = self.lock();
        if let Some(sinks) = registry.get_mut(task_id) {
            sinks.retain(|(id, _)| *id != subscriber);
            if sinks.is_empty() {
                registry.remove(task_id);
            }
        }
    }

    async fn publish(&self, task_id: &str, event: TaskEvent) {
        // Deliver outside the lock so slow sinks never block subscribe/unsubscribe
        let sinks = match self.lock().get(task_id) {
            Some(sinks) => sinks.clone(),
            None => return,
        };

        let failed: Vec<SubscriberId> = sinks
            .iter()
            .filter_map(|(id, sink)| match sink.deliver(&event) {
                Ok(()) => None,
                Err(e) => {
                    debug!(task_id, subscriber = id.0, error = %e, "Pruning dead subscriber");
                    Some(*id)
                }
            })
            .collect();

        if failed.is_empty() {
            return;
        }

        let mut registry = self.lock();
        if let Some(sinks) = registry.get_mut(task_id) {
            sinks.retain(|(id, _)| !failed.contains(id));
            if sinks.is_empty() {
                registry.remove(task_id);
            }
        }
    }
}

/// Publishes from synchronous code by blocking on the runtime
///
/// Must be used from a thread that is not driving the runtime, e.g. inside
/// `tokio::task::spawn_blocking`.
pub struct BlockingPublisher {
    bus: Arc<dyn EventBus>,
    handle: Handle,
}

impl BlockingPublisher {
    pub fn new(bus: Arc<dyn EventBus>, handle: Handle) -> Self {
        Self { bus, handle }
    }

    pub fn publish(&self, task_id: &str, event: TaskEvent) {
        self.handle.block_on(self.bus.publish(task_id, event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl EventSink for FailingSink {
        fn deliver(&self, _event: &TaskEvent) -> Result<()> {
            Err(AppError::Internal {
                message: "gone".into(),
            })
        }
    }

    fn update(name: &str, done: usize) -> TaskEvent {
        TaskEvent::FileUpdate {
            file_name: name.into(),
            status: FileStatus::Done,
            download_url: Some(format!("/api/template/download/filled_{}", name)),
            files_done: done,
            files_total: 2,
        }
    }

    #[test]
    fn test_event_wire_format() {
        let value = serde_json::to_value(update("a.json", 1)).unwrap();
        assert_eq!(value["type"], "file_update");
        assert_eq!(value["fileName"], "a.json");
        assert_eq!(value["status"], "done");
        assert_eq!(value["filesDone"], 1);
        assert_eq!(value["filesTotal"], 2);

        let log = serde_json::to_value(TaskEvent::log("Template", "hi", LogType::Info)).unwrap();
        assert_eq!(log["type"], "call_log");
        assert_eq!(log["logType"], "info");
        assert!(log["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_two_subscribers_see_same_order() {
        let bus = InMemoryEventBus::new();
        let (_, mut first) = subscribe_channel(&bus, "t1").await;
        let (_, mut second) = subscribe_channel(&bus, "t1").await;

        bus.publish("t1", TaskEvent::log("Template", "start", LogType::Info)).await;
        bus.publish("t1", update("a.json", 1)).await;
        bus.publish("t1", update("b.json", 2)).await;

        for rx in [&mut first, &mut second] {
            assert!(matches!(rx.recv().await, Some(TaskEvent::CallLog { .. })));
            assert_eq!(rx.recv().await, Some(update("a.json", 1)));
            assert_eq!(rx.recv().await, Some(update("b.json", 2)));
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let bus = InMemoryEventBus::new();
        bus.publish("nobody", update("a.json", 1)).await;

        // Late subscriber gets nothing from before
        let (_, mut rx) = subscribe_channel(&bus, "nobody").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failing_sink_is_pruned() {
        let bus = InMemoryEventBus::new();
        bus.subscribe("t1", Arc::new(FailingSink)).await;
        let (_, mut rx) = subscribe_channel(&bus, "t1").await;
        assert_eq!(bus.subscriber_count("t1"), 2);

        bus.publish("t1", update("a.json", 1)).await;

        assert_eq!(bus.subscriber_count("t1"), 1);
        assert_eq!(rx.recv().await, Some(update("a.json", 1)));
    }

    #[tokio::test]
    async fn test_dropped_receiver_removes_entry() {
        let bus = InMemoryEventBus::new();
        let (_, rx) = subscribe_channel(&bus, "t1").await;
        drop(rx);

        bus.publish("t1", update("a.json", 1)).await;
        assert_eq!(bus.subscriber_count("t1"), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_deletes_empty_entry() {
        let bus = InMemoryEventBus::new();
        let (id, _rx) = subscribe_channel(&bus, "t1").await;
        bus.unsubscribe("t1", id).await;
        assert_eq!(bus.subscriber_count("t1"), 0);
        assert!(bus.lock().get("t1").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_publisher() {
        let bus: Arc<InMemoryEventBus> = Arc::new(InMemoryEventBus::new());
        let (_, mut rx) = subscribe_channel(bus.as_ref(), "t1").await;

        let publisher = BlockingPublisher::new(bus.clone(), Handle::current());
        tokio::task::spawn_blocking(move || publisher.publish("t1", update("a.json", 1)))
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(update("a.json", 1)));
    }
}
