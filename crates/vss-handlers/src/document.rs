//! Handler for push-capable document stores

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use vss_core::{
    ChangeFeed, ConnectionId, GetRequest, Handler, HandlerError, HandlerFactory, HandlerResult,
    MessageSink, ResponseMessage, SetRequest, SubscribeRequest, UnsubscribeRequest,
};

use crate::common;
use crate::subscription::PushRegistry;

/// Serves one connection against a document store
pub struct DocumentHandler {
    store: Arc<dyn ChangeFeed>,
    registry: Arc<PushRegistry>,
}

#[async_trait]
impl Handler for DocumentHandler {
    fn name(&self) -> &str {
        "document"
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

    async fn unsubscribe_client(&self, conn: ConnectionId) {
        self.registry.remove_connection(conn);
    }
}

/// Shares one store and one push registry among all connections
pub struct DocumentHandlerFactory {
    store: Arc<dyn ChangeFeed>,
    registry: Arc<PushRegistry>,
}

impl DocumentHandlerFactory {
    pub fn new(store: Arc<dyn ChangeFeed>, sink: Arc<dyn MessageSink>) -> Self {
        let registry = Arc::new(PushRegistry::new(store.clone(), sink));
        Self { store, registry }
    }

    pub fn registry(&self) -> &Arc<PushRegistry> {
        &self.registry
    }
}

impl HandlerFactory for DocumentHandlerFactory {
    fn create_handler(&self) -> Arc<dyn Handler> {
        Arc::new(DocumentHandler {
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
    use crate::memory::MemoryDocumentStore;
    use crate::testing::{catalog, RecordingSink};
    use serde_json::json;
    use vss_core::{dispatch, DomainMessage, TimeRange, TimeseriesGetRequest};

    fn factory() -> DocumentHandlerFactory {
        let store = Arc::new(MemoryDocumentStore::new(catalog()));
        DocumentHandlerFactory::new(store, Arc::new(RecordingSink::default()))
    }

    #[tokio::test]
    async fn test_operations_need_connect() {
        let handler = factory().create_handler();
        let req = GetRequest {
            instance: "VIN1".to_string(),
            path: "Vehicle_Speed".to_string(),
            root: vss_core::Root::Relative,
            format: vss_core::Format::Nested,
            request_id: None,
        };
        let err = handler.get(ConnectionId::new(), &req).await.unwrap_err();
        assert_eq!(err.status_code(), 503);

        handler.authenticate_and_connect().await.unwrap();
        let err = handler.get(ConnectionId::new(), &req).await.unwrap_err();
        assert!(matches!(err, HandlerError::DataNotFound { .. }));
    }

    #[tokio::test]
    async fn test_timeseries_get_not_supported() {
        let handler = factory().create_handler();
        handler.authenticate_and_connect().await.unwrap();
        let msg = DomainMessage::TimeseriesGet(TimeseriesGetRequest {
            instance: "VIN1".to_string(),
            path: "Vehicle_Speed".to_string(),
            range: TimeRange::unbounded(),
            request_id: Some(json!(3)),
        });
        match dispatch(handler.as_ref(), ConnectionId::new(), &msg).await {
            ResponseMessage::Error { code, .. } => assert_eq!(code, 501),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handlers_share_registry() {
        let factory = factory();
        let a = factory.create_handler();
        let b = factory.create_handler();
        a.authenticate_and_connect().await.unwrap();

        let conn = ConnectionId::new();
        let req = SubscribeRequest {
            instance: "VIN1".to_string(),
            path: "Vehicle_Speed".to_string(),
            root: vss_core::Root::Absolute,
            format: vss_core::Format::Nested,
            request_id: None,
        };
        a.subscribe(conn, &req).await.unwrap();
        assert!(b.subscribe(conn, &req).await.is_err());

        b.unsubscribe_client(conn).await;
        assert!(!factory.registry().is_subscribed(conn, "VIN1"));
        factory.shutdown();
    }
}
