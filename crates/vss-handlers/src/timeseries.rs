//! Handler for pull-only time-series stores

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::error;

use vss_core::{
    ConnectionId, DatapointStore, GetRequest, Handler, HandlerError, HandlerFactory,
    HandlerResult, MessageSink, ResponseMessage, SetRequest, SubscribeRequest,
    TimeseriesGetRequest, UnsubscribeRequest,
};

use crate::common;
use crate::subscription::PollRegistry;

/// Serves one connection against a time-series store
pub struct TimeseriesHandler {
    store: Arc<dyn DatapointStore>,
    registry: PollRegistry,
}

#[async_trait]
impl Handler for TimeseriesHandler {
    fn name(&self) -> &str {
        "timeseries"
    }

    async fn authenticate_and_connect(&self) -> HandlerResult<()> {
        self.store.connect().await.map_err(|e| {
            error!(store = self.store.name(), error = %e, "Failed to connect to store");
            HandlerError::from(e)
        })
    }

    async fn get(&self, _conn: ConnectionId, req: &GetRequest) -> HandlerResult<ResponseMessage> {
        common::get(self.store.as_ref(), req).await
    }

    async fn set(&self, _conn: ConnectionId, req: &SetRequest) -> HandlerResult<ResponseMessage> {
        common::set(self.store.as_ref(), req).await
    }

    async fn subscribe(
        &self,
        conn: ConnectionId,
        req: &SubscribeRequest,
    ) -> HandlerResult<ResponseMessage> {
        self.registry.subscribe(conn, req)
    }

    async fn unsubscribe(
        &self,
        conn: ConnectionId,
        req: &UnsubscribeRequest,
    ) -> HandlerResult<ResponseMessage> {
        self.registry.unsubscribe(conn, req)
    }

    async fn timeseries_get(
        &self,
        _conn: ConnectionId,
        req: &TimeseriesGetRequest,
    ) -> HandlerResult<ResponseMessage> {
        common::timeseries_get(self.store.as_ref(), req).await
    }

    async fn unsubscribe_client(&self, conn: ConnectionId) {
        self.registry.remove_connection(conn);
    }
}

/// Shares one store and one poll registry among all connections
pub struct TimeseriesHandlerFactory {
    store: Arc<dyn DatapointStore>,
    registry: PollRegistry,
}

impl TimeseriesHandlerFactory {
    pub fn new(
        store: Arc<dyn DatapointStore>,
        sink: Arc<dyn MessageSink>,
        poll_interval: Duration,
    ) -> Self {
        let registry = PollRegistry::new(store.clone(), sink, poll_interval);
        Self { store, registry }
    }

    pub fn registry(&self) -> &PollRegistry {
        &self.registry
    }
}

impl HandlerFactory for TimeseriesHandlerFactory {
    fn create_handler(&self) -> Arc<dyn Handler> {
        Arc::new(TimeseriesHandler {
            store: self.store.clone(),
            registry: self.registry.clone(),
        })
    }

    fn shutdown(&self) {
        self.registry.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTimeseriesStore;
    use crate::testing::{catalog, RecordingSink};
    use serde_json::json;
    use vss_core::{dispatch, DomainMessage, Format, PermissionsEditRequest, Root};

    fn factory() -> TimeseriesHandlerFactory {
        TimeseriesHandlerFactory::new(
            Arc::new(MemoryTimeseriesStore::new(catalog())),
            Arc::new(RecordingSink::default()),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_subscribe_starts_shared_ticker() {
        let factory = factory();
        let handler = factory.create_handler();
        handler.authenticate_and_connect().await.unwrap();

        let conn = ConnectionId::new();
        let req = SubscribeRequest {
            instance: "VIN1".to_string(),
            path: "Vehicle_CurrentLocation".to_string(),
            root: Root::Absolute,
            format: Format::Nested,
            request_id: Some(json!("1")),
        };
        let response = handler.subscribe(conn, &req).await.unwrap();
        assert!(matches!(response, ResponseMessage::Status { code: 200, .. }));
        assert!(factory.registry().is_polling());

        handler.unsubscribe_client(conn).await;
        assert!(!factory.registry().is_polling());
    }

    #[tokio::test]
    async fn test_permissions_edit_not_supported() {
        let handler = factory().create_handler();
        let msg = DomainMessage::PermissionsEdit(PermissionsEditRequest {
            instance: "VIN1".to_string(),
            path: "Vehicle".to_string(),
            user_id: "alice".to_string(),
            allow: vec!["Vehicle.Speed".to_string()],
            deny: vec![],
            delete: vec![],
            request_id: Some(json!(9)),
        });
        match dispatch(handler.as_ref(), ConnectionId::new(), &msg).await {
            ResponseMessage::Error {
                code, request_id, ..
            } => {
                assert_eq!(code, 501);
                assert_eq!(request_id, Some(json!(9)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
