//! Push subscription registry
//!
//! For stores with a native change feed. One listener task runs per watched
//! instance; it is attached with the first subscription to that instance and
//! aborted once no connection watches it anymore. A listener whose feed
//! closes removes itself, so the next subscribe attaches a fresh one.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vss_core::path::display_list;
use vss_core::{
    format_response, ChangeEvent, ChangeFeed, ConnectionId, HandlerError, HandlerResult,
    MessageSink, NamedValue, ResponseMessage, Root, SubscribeRequest, UnsubscribeRequest,
};

use super::table::SubscriptionTable;

struct Listener {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct PushState {
    table: SubscriptionTable,
    listeners: HashMap<String, Listener>,
    next_listener: u64,
}

/// Subscription registry driven by store change events
pub struct PushRegistry {
    store: Arc<dyn ChangeFeed>,
    sink: Arc<dyn MessageSink>,
    /// Shared with listener tasks; every read and write goes through this lock
    state: Arc<Mutex<PushState>>,
}

impl PushRegistry {
    pub fn new(store: Arc<dyn ChangeFeed>, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            store,
            sink,
            state: Arc::new(Mutex::new(PushState::default())),
        }
    }

    fn resolve(&self, path: &str) -> HandlerResult<Vec<String>> {
        let resolved = self.store.catalog().resolve(path);
        if resolved.is_empty() {
            return Err(HandlerError::UnknownPath(path.to_string()));
        }
        Ok(resolved)
    }

    pub fn subscribe(
        &self,
        conn: ConnectionId,
        req: &SubscribeRequest,
    ) -> HandlerResult<ResponseMessage> {
        let resolved = self.resolve(&req.path)?;

        let mut state = self.state.lock();
        let added = state.table.subscribe(conn, req, &resolved)?;

        if !state.listeners.contains_key(&req.instance) {
            state.next_listener += 1;
            let id = state.next_listener;
            let handle = self.spawn_listener(&req.instance, id);
            state
                .listeners
                .insert(req.instance.clone(), Listener { id, handle });
            info!(instance = %req.instance, "Attached change listener");
        }

        debug!(
            connection = %conn,
            instance = %req.instance,
            datapoints = ?state.table.get(conn, &req.instance).map(|s| &s.datapoints),
            "Subscription updated"
        );

        Ok(ResponseMessage::ok(
            format!(
                "Successfully subscribed to '{}' [{}].",
                req.instance,
                display_list(&added)
            ),
            req.request_id.clone(),
        ))
    }

    pub fn unsubscribe(
        &self,
        conn: ConnectionId,
        req: &UnsubscribeRequest,
    ) -> HandlerResult<ResponseMessage> {
        let resolved = self.resolve(&req.path)?;

        let mut state = self.state.lock();
        let removal = state.table.unsubscribe(conn, &req.instance, &resolved)?;
        if removal.entry_dropped {
            detach_if_orphaned(&mut state, &req.instance);
        }

        debug!(
            connection = %conn,
            instance = %req.instance,
            removed = ?removal.removed,
            "Subscription reduced"
        );

        Ok(ResponseMessage::ok(
            "Successfully unsubscribed",
            req.request_id.clone(),
        ))
    }

    /// Drop all subscriptions of `conn`. Idempotent.
    pub fn remove_connection(&self, conn: ConnectionId) {
        let mut state = self.state.lock();
        let instances = state.table.remove_connection(conn);
        for instance in &instances {
            detach_if_orphaned(&mut state, instance);
        }
        if !instances.is_empty() {
            debug!(connection = %conn, instances = ?instances, "Removed client subscriptions");
        }
    }

    /// Number of instances with an attached listener
    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    pub fn is_subscribed(&self, conn: ConnectionId, instance: &str) -> bool {
        self.state.lock().table.get(conn, instance).is_some()
    }

    /// Abort every listener and forget all subscriptions
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        for (_, listener) in state.listeners.drain() {
            listener.handle.abort();
        }
        state.table = SubscriptionTable::new();
    }

    fn spawn_listener(&self, instance: &str, id: u64) -> JoinHandle<()> {
        let mut rx = self.store.watch(instance);
        let state = self.state.clone();
        let sink = self.sink.clone();
        let instance = instance.to_string();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => deliver_event(&state, sink.as_ref(), &event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(instance = %instance, skipped = n, "Change listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(instance = %instance, "Change feed closed");
                        let mut state = state.lock();
                        if state.listeners.get(&instance).is_some_and(|l| l.id == id) {
                            state.listeners.remove(&instance);
                        }
                        break;
                    }
                }
            }
        })
    }
}

impl Drop for PushRegistry {
    fn drop(&mut self) {
        for (_, listener) in self.state.lock().listeners.drain() {
            listener.handle.abort();
        }
    }
}

fn detach_if_orphaned(state: &mut PushState, instance: &str) {
    if state.table.is_watched(instance) {
        return;
    }
    if let Some(listener) = state.listeners.remove(instance) {
        listener.handle.abort();
        info!(instance = %instance, "Detached change listener");
    }
}

/// Fan a change event out to the connections watching its instance
fn deliver_event(state: &Mutex<PushState>, sink: &dyn MessageSink, event: &ChangeEvent) {
    if event.deleted {
        info!(instance = %event.instance, "Instance was deleted");
        return;
    }

    let state = state.lock();
    for (conn, subscription) in state.table.subscribers(&event.instance) {
        let matching: Vec<NamedValue> = event
            .changed
            .iter()
            .filter(|v| subscription.datapoints.contains(&v.name))
            .cloned()
            .collect();
        if matching.is_empty() {
            continue;
        }
        let metadata: Vec<NamedValue> = event
            .metadata
            .iter()
            .filter(|m| subscription.datapoints.contains(&m.name))
            .cloned()
            .collect();

        let Some(formatted) = format_response(
            &subscription.path,
            &matching,
            &metadata,
            Root::Relative,
            subscription.format,
        ) else {
            continue;
        };

        let delivered = sink.deliver(
            conn,
            ResponseMessage::Data {
                instance: event.instance.clone(),
                data: formatted.data,
                metadata: formatted.metadata,
                request_id: None,
            },
        );
        if !delivered {
            debug!(connection = %conn, "Dropped update for closed connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDocumentStore;
    use crate::testing::RecordingSink;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use vss_core::{DatapointStore, Format};

    async fn setup() -> (Arc<MemoryDocumentStore>, Arc<RecordingSink>, PushRegistry) {
        let store = Arc::new(MemoryDocumentStore::new(crate::testing::catalog()));
        store.connect().await.unwrap();
        let sink = Arc::new(RecordingSink::default());
        let registry = PushRegistry::new(store.clone(), sink.clone());
        (store, sink, registry)
    }

    fn subscribe_req(path: &str) -> SubscribeRequest {
        SubscribeRequest {
            instance: "VIN1".to_string(),
            path: path.to_string(),
            root: Root::Absolute,
            format: Format::Nested,
            request_id: Some(json!("1")),
        }
    }

    fn unsubscribe_req(path: &str) -> UnsubscribeRequest {
        UnsubscribeRequest {
            instance: "VIN1".to_string(),
            path: path.to_string(),
            request_id: Some(json!("2")),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_unknown_path_creates_no_state() {
        let (_store, _sink, registry) = setup().await;
        let conn = ConnectionId::new();
        let err = registry
            .subscribe(conn, &subscribe_req("Vehicle_Nope"))
            .unwrap_err();
        assert!(matches!(err, HandlerError::UnknownPath(_)));
        assert_eq!(registry.listener_count(), 0);
        assert!(!registry.is_subscribed(conn, "VIN1"));
    }

    #[tokio::test]
    async fn test_second_identical_subscribe_fails() {
        let (_store, _sink, registry) = setup().await;
        let conn = ConnectionId::new();
        registry
            .subscribe(conn, &subscribe_req("Vehicle_CurrentLocation"))
            .unwrap();
        let err = registry
            .subscribe(conn, &subscribe_req("Vehicle_CurrentLocation"))
            .unwrap_err();
        assert!(matches!(err, HandlerError::AlreadySubscribed { .. }));
        assert_eq!(registry.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_change_delivers_matching_points_relative() {
        let (store, sink, registry) = setup().await;
        let conn = ConnectionId::new();
        registry
            .subscribe(conn, &subscribe_req("Vehicle_CurrentLocation"))
            .unwrap();

        store
            .write_values(
                "VIN1",
                &[
                    NamedValue::new("Vehicle_CurrentLocation_Latitude", json!(12.3)),
                    NamedValue::new("Vehicle_Speed", json!(80)),
                ],
                &[],
            )
            .await
            .unwrap();
        settle().await;

        let delivered = sink.take();
        assert_eq!(delivered.len(), 1);
        let (to, message) = &delivered[0];
        assert_eq!(*to, conn);
        assert_eq!(
            *message,
            ResponseMessage::Data {
                instance: "VIN1".to_string(),
                data: json!({"Latitude": 12.3}),
                metadata: None,
                request_id: None,
            }
        );
    }

    #[tokio::test]
    async fn test_change_only_reaches_subscribed_connections() {
        let (store, sink, registry) = setup().await;
        let speed = ConnectionId::new();
        let location = ConnectionId::new();
        registry.subscribe(speed, &subscribe_req("Vehicle_Speed")).unwrap();
        registry
            .subscribe(location, &subscribe_req("Vehicle_CurrentLocation"))
            .unwrap();

        store
            .write_values("VIN1", &[NamedValue::new("Vehicle_Speed", json!(50))], &[])
            .await
            .unwrap();
        settle().await;

        let delivered = sink.take();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, speed);
    }

    #[tokio::test]
    async fn test_deletion_is_not_delivered() {
        let (store, sink, registry) = setup().await;
        let conn = ConnectionId::new();
        store
            .write_values("VIN1", &[NamedValue::new("Vehicle_Speed", json!(1))], &[])
            .await
            .unwrap();
        registry.subscribe(conn, &subscribe_req("Vehicle_Speed")).unwrap();

        store.delete_instance("VIN1");
        settle().await;
        assert!(sink.take().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_all_detaches_listener() {
        let (_store, _sink, registry) = setup().await;
        let conn = ConnectionId::new();
        registry
            .subscribe(conn, &subscribe_req("Vehicle_CurrentLocation"))
            .unwrap();
        registry
            .unsubscribe(conn, &unsubscribe_req("Vehicle_CurrentLocation"))
            .unwrap();
        assert!(!registry.is_subscribed(conn, "VIN1"));
        assert_eq!(registry.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_without_subscription() {
        let (_store, _sink, registry) = setup().await;
        let err = registry
            .unsubscribe(ConnectionId::new(), &unsubscribe_req("Vehicle_Speed"))
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert!(err.summary().contains("Cannot unsubscribe"));
    }

    #[tokio::test]
    async fn test_closed_feed_reattaches_on_next_subscribe() {
        let (store, sink, registry) = setup().await;
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        registry.subscribe(a, &subscribe_req("Vehicle_Speed")).unwrap();
        assert_eq!(registry.listener_count(), 1);

        assert!(store.close_feed("VIN1"));
        settle().await;
        assert_eq!(registry.listener_count(), 0);
        assert!(registry.is_subscribed(a, "VIN1"));

        registry.subscribe(b, &subscribe_req("Vehicle_Speed")).unwrap();
        assert_eq!(registry.listener_count(), 1);

        store
            .write_values("VIN1", &[NamedValue::new("Vehicle_Speed", json!(30))], &[])
            .await
            .unwrap();
        settle().await;

        let mut receivers: Vec<ConnectionId> = sink.take().into_iter().map(|(c, _)| c).collect();
        receivers.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(receivers, expected);
    }

    #[tokio::test]
    async fn test_listener_survives_while_other_connection_watches() {
        let (_store, _sink, registry) = setup().await;
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        registry.subscribe(a, &subscribe_req("Vehicle_Speed")).unwrap();
        registry.subscribe(b, &subscribe_req("Vehicle_Speed")).unwrap();

        registry.remove_connection(a);
        assert_eq!(registry.listener_count(), 1);
        registry.remove_connection(b);
        assert_eq!(registry.listener_count(), 0);
        registry.remove_connection(b);
    }
}
