//! Handler trait - the backend-specific capability set
//!
//! A handler owns (a share of) one backend session and serves the domain
//! messages of a connection. Capabilities a backend does not offer keep the
//! default implementation, which logs and answers with a typed
//! "not supported" error.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{HandlerError, HandlerResult};
use crate::message::{
    ConnectionId, DomainMessage, GetRequest, PermissionsEditRequest, ResponseMessage, SetRequest,
    SubscribeRequest, TimeseriesGetRequest, UnsubscribeRequest,
};

fn unsupported(capability: &str) -> HandlerError {
    warn!(capability, "Capability is not implemented by this handler");
    HandlerError::NotSupported(capability.to_string())
}

/// Backend-specific implementation of the gateway operations
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handler name for logs
    fn name(&self) -> &str;

    /// Open or refresh the backend session. Must be idempotent.
    async fn authenticate_and_connect(&self) -> HandlerResult<()> {
        warn!(handler = self.name(), "authenticate_and_connect is not implemented");
        Ok(())
    }

    async fn get(&self, _conn: ConnectionId, _req: &GetRequest) -> HandlerResult<ResponseMessage> {
        Err(unsupported("get"))
    }

    async fn set(&self, _conn: ConnectionId, _req: &SetRequest) -> HandlerResult<ResponseMessage> {
        Err(unsupported("set"))
    }

    async fn subscribe(
        &self,
        _conn: ConnectionId,
        _req: &SubscribeRequest,
    ) -> HandlerResult<ResponseMessage> {
        Err(unsupported("subscribe"))
    }

    async fn unsubscribe(
        &self,
        _conn: ConnectionId,
        _req: &UnsubscribeRequest,
    ) -> HandlerResult<ResponseMessage> {
        Err(unsupported("unsubscribe"))
    }

    async fn timeseries_get(
        &self,
        _conn: ConnectionId,
        _req: &TimeseriesGetRequest,
    ) -> HandlerResult<ResponseMessage> {
        Err(unsupported("timeseries/get"))
    }

    async fn permissions_edit(
        &self,
        _conn: ConnectionId,
        _req: &PermissionsEditRequest,
    ) -> HandlerResult<ResponseMessage> {
        Err(unsupported("permissions/edit"))
    }

    /// Drop every subscription held by `conn`. Must be idempotent.
    async fn unsubscribe_client(&self, conn: ConnectionId) {
        warn!(handler = self.name(), connection = %conn, "unsubscribe_client is not implemented");
    }
}

/// Builds one handler per accepted connection
pub trait HandlerFactory: Send + Sync {
    fn create_handler(&self) -> Arc<dyn Handler>;

    /// Release shared resources (listeners, timers) at process shutdown
    fn shutdown(&self) {}
}

/// Route a domain message to the matching handler capability.
///
/// Errors become an `Error` response carrying the request id.
pub async fn dispatch(
    handler: &dyn Handler,
    conn: ConnectionId,
    message: &DomainMessage,
) -> ResponseMessage {
    debug!(
        connection = %conn,
        method = message.method(),
        instance = message.instance(),
        path = message.path(),
        "Dispatching message"
    );

    let result = match message {
        DomainMessage::Get(req) => handler.get(conn, req).await,
        DomainMessage::Set(req) => handler.set(conn, req).await,
        DomainMessage::Subscribe(req) => handler.subscribe(conn, req).await,
        DomainMessage::Unsubscribe(req) => handler.unsubscribe(conn, req).await,
        DomainMessage::TimeseriesGet(req) => handler.timeseries_get(conn, req).await,
        DomainMessage::PermissionsEdit(req) => handler.permissions_edit(conn, req).await,
    };

    match result {
        Ok(response) => response,
        Err(err) => {
            debug!(connection = %conn, error = %err, "Handler returned an error");
            ResponseMessage::from_error(&err, message.request_id().cloned())
        }
    }
}
