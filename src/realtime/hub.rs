//! Change-event hub: table-keyed fan-out under backpressure
//!
//! Publishers never block: each subscriber owns a bounded buffer, and a
//! full buffer drops the event for that subscriber and raises its lag
//! flag. Event ids are strictly increasing within the process.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

/// What a CRUD write did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    /// The SSE event name for this action
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

/// A row change fanned out to subscribers and webhooks
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    /// Monotonic per-process id
    #[serde(skip)]
    pub id: u64,
    pub action: Action,
    pub table: String,
    pub record: serde_json::Value,
}

/// Per-subscriber outbound buffer capacity
const SUBSCRIBER_BUFFER: usize = 64;

/// Events kept for `Last-Event-Id` resumption
const REPLAY_CAPACITY: usize = 256;

struct SubscriberHandle {
    tables: HashSet<String>,
    tx: mpsc::Sender<Arc<ChangeEvent>>,
    lagged: Arc<AtomicBool>,
}

/// A live subscription handed to the SSE writer task
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<Arc<ChangeEvent>>,
    pub lagged: Arc<AtomicBool>,
    hub: Arc<HubInner>,
}

impl Subscription {
    /// Events newer than `last_id` still held in the replay ring,
    /// filtered to this subscription's tables.
    pub fn replay_since(&self, last_id: u64, tables: &HashSet<String>) -> Vec<Arc<ChangeEvent>> {
        let replay = self.hub.replay.lock().expect("replay lock");
        replay
            .iter()
            .filter(|e| e.id > last_id && tables.contains(&e.table))
            .cloned()
            .collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

struct HubInner {
    next_event_id: AtomicU64,
    next_subscriber_id: AtomicU64,
    subscribers: RwLock<HashMap<u64, SubscriberHandle>>,
    /// table → subscriber ids; publishers only read this index
    index: RwLock<HashMap<String, HashSet<u64>>>,
    replay: Mutex<VecDeque<Arc<ChangeEvent>>>,
    closed: AtomicBool,
}

impl HubInner {
    fn unsubscribe(&self, id: u64) {
        let removed = self.subscribers.write().expect("subscriber lock").remove(&id);
        if let Some(handle) = removed {
            let mut index = self.index.write().expect("index lock");
            for table in handle.tables {
                if let Some(ids) = index.get_mut(&table) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        index.remove(&table);
                    }
                }
            }
        }
    }
}

/// The process-wide hub
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    /// Create a hub
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                next_event_id: AtomicU64::new(1),
                next_subscriber_id: AtomicU64::new(1),
                subscribers: RwLock::new(HashMap::new()),
                index: RwLock::new(HashMap::new()),
                replay: Mutex::new(VecDeque::with_capacity(REPLAY_CAPACITY)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to a set of tables
    pub fn subscribe(&self, tables: HashSet<String>) -> Subscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let lagged = Arc::new(AtomicBool::new(false));

        {
            let mut index = self.inner.index.write().expect("index lock");
            for table in &tables {
                index.entry(table.clone()).or_default().insert(id);
            }
        }
        self.inner.subscribers.write().expect("subscriber lock").insert(
            id,
            SubscriberHandle {
                tables: tables.clone(),
                tx,
                lagged: lagged.clone(),
            },
        );

        Subscription {
            id,
            rx,
            lagged,
            hub: self.inner.clone(),
        }
    }

    /// Publish a change event. Never blocks; slow subscribers drop the
    /// event and observe a lag marker instead. Returns the event.
    pub fn publish(
        &self,
        action: Action,
        table: &str,
        record: serde_json::Value,
    ) -> Arc<ChangeEvent> {
        let id = self.inner.next_event_id.fetch_add(1, Ordering::AcqRel);
        let event = Arc::new(ChangeEvent {
            id,
            action,
            table: table.to_string(),
            record,
        });

        {
            let mut replay = self.inner.replay.lock().expect("replay lock");
            if replay.len() == REPLAY_CAPACITY {
                replay.pop_front();
            }
            replay.push_back(event.clone());
        }

        if self.inner.closed.load(Ordering::Acquire) {
            return event;
        }

        // Publisher-side filter: only subscribers indexed for this table.
        let targets: Vec<u64> = {
            let index = self.inner.index.read().expect("index lock");
            index
                .get(table)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default()
        };
        if targets.is_empty() {
            return event;
        }

        let subscribers = self.inner.subscribers.read().expect("subscriber lock");
        for sub_id in targets {
            if let Some(handle) = subscribers.get(&sub_id) {
                if handle.tx.try_send(event.clone()).is_err() {
                    handle.lagged.store(true, Ordering::Release);
                }
            }
        }
        event
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().expect("subscriber lock").len()
    }

    /// Close the hub: every subscriber channel ends and writer tasks exit
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.subscribers.write().expect("subscriber lock").clear();
        self.inner.index.write().expect("index lock").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn fan_out_is_filtered_by_table() {
        let hub = Hub::new();
        let mut users_sub = hub.subscribe(tables(&["users"]));
        let mut logs_sub = hub.subscribe(tables(&["logs"]));

        hub.publish(Action::Create, "users", serde_json::json!({"name": "Charlie"}));

        let event = users_sub.rx.recv().await.unwrap();
        assert_eq!(event.table, "users");
        assert_eq!(event.action, Action::Create);

        // the logs subscriber sees nothing
        assert!(logs_sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn event_ids_strictly_increase() {
        let hub = Hub::new();
        let a = hub.publish(Action::Create, "t", serde_json::json!({}));
        let b = hub.publish(Action::Update, "t", serde_json::json!({}));
        let c = hub.publish(Action::Delete, "t", serde_json::json!({}));
        assert!(a.id < b.id && b.id < c.id);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_and_lags() {
        let hub = Hub::new();
        let sub = hub.subscribe(tables(&["t"]));

        for _ in 0..(SUBSCRIBER_BUFFER + 10) {
            hub.publish(Action::Create, "t", serde_json::json!({}));
        }

        assert!(sub.lagged.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn unsubscribe_on_drop() {
        let hub = Hub::new();
        {
            let _sub = hub.subscribe(tables(&["t"]));
            assert_eq!(hub.subscriber_count(), 1);
        }
        assert_eq!(hub.subscriber_count(), 0);

        // publishing to a table with no subscribers is fine
        hub.publish(Action::Create, "t", serde_json::json!({}));
    }

    #[tokio::test]
    async fn close_ends_subscriber_channels() {
        let hub = Hub::new();
        let mut sub = hub.subscribe(tables(&["t"]));
        hub.close();
        assert!(sub.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn replay_since_filters_by_id_and_table() {
        let hub = Hub::new();
        let sub = hub.subscribe(tables(&["users"]));

        let first = hub.publish(Action::Create, "users", serde_json::json!({"n": 1}));
        hub.publish(Action::Create, "logs", serde_json::json!({"n": 2}));
        hub.publish(Action::Update, "users", serde_json::json!({"n": 3}));

        let replayed = sub.replay_since(first.id, &tables(&["users"]));
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].action, Action::Update);
    }
}
