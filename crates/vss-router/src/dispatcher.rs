//! Connection dispatcher
//!
//! Owns the connection lifecycle: every accepted socket gets its own
//! handler from the factory, starts paused, and is resumed once the handler
//! has connected to its store. Frames are decoded, dispatched and answered
//! on the same connection.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use vss_core::{
    dispatch, status, ConnectionId, Handler, HandlerError, HandlerFactory, ResponseMessage,
};

use crate::codec;
use crate::connection::{ConnectionState, Connections};

/// Default upper bound for one request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A connection accepted by the dispatcher
pub struct Session {
    pub id: ConnectionId,
    handler: Arc<dyn Handler>,
}

pub struct Dispatcher {
    connections: Arc<Connections>,
    factory: Arc<dyn HandlerFactory>,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(connections: Arc<Connections>, factory: Arc<dyn HandlerFactory>) -> Self {
        Self {
            connections,
            factory,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn connections(&self) -> &Arc<Connections> {
        &self.connections
    }

    /// Register a new connection. It stays paused until [`Self::authenticate`].
    pub fn accept(&self, tx: mpsc::UnboundedSender<ResponseMessage>) -> Session {
        let id = ConnectionId::new();
        self.connections.register(id, tx);
        let handler = self.factory.create_handler();
        info!(connection = %id, handler = handler.name(), "Client connected");
        Session { id, handler }
    }

    /// Connect the session's handler to its backend and resume the connection.
    ///
    /// On failure the connection stays paused and its frames are dropped.
    pub async fn authenticate(&self, session: &Session) -> bool {
        match session.handler.authenticate_and_connect().await {
            Ok(()) => {
                self.connections.resume(session.id);
                debug!(connection = %session.id, "Connection resumed");
                true
            }
            Err(e) => {
                error!(
                    connection = %session.id,
                    error = %e,
                    "Backend session failed, connection stays paused"
                );
                false
            }
        }
    }

    /// Decode one frame, dispatch it and answer on the same connection.
    ///
    /// Frames on a paused connection are dropped unread.
    pub async fn handle_frame(&self, session: &Session, raw: &str) {
        if self.connections.state(session.id) != Some(ConnectionState::Active) {
            warn!(connection = %session.id, "Dropping frame on paused connection");
            return;
        }

        let message = match codec::decode(raw) {
            Ok(message) => message,
            Err(rejection) => {
                debug!(connection = %session.id, errors = ?rejection.errors, "Rejected frame");
                self.connections.send(session.id, rejection.into_response());
                return;
            }
        };

        debug!(
            connection = %session.id,
            method = message.method(),
            instance = message.instance(),
            path = message.path(),
            "Dispatching request"
        );

        let request_id = message.request_id().cloned();
        let call = AssertUnwindSafe(dispatch(session.handler.as_ref(), session.id, &message))
            .catch_unwind();
        let response = match tokio::time::timeout(self.request_timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                error!(connection = %session.id, method = message.method(), "Handler panicked");
                ResponseMessage::from_error(
                    &HandlerError::Internal("handler panicked".to_string()),
                    request_id,
                )
            }
            Err(_) => {
                let ms = self.request_timeout.as_millis() as u64;
                warn!(
                    connection = %session.id,
                    method = message.method(),
                    timeout_ms = ms,
                    "Request timed out"
                );
                ResponseMessage::from_error(&HandlerError::Timeout(ms), request_id)
            }
        };

        if !self.connections.send(session.id, response) {
            debug!(connection = %session.id, "Connection gone before response");
        }
    }

    /// Tear down everything the connection owns
    pub async fn disconnect(&self, session: &Session) {
        session.handler.unsubscribe_client(session.id).await;
        self.connections.remove(session.id);
        info!(connection = %session.id, "Client disconnected");
    }

    /// Drive one WebSocket until it closes
    pub async fn serve(self: Arc<Self>, socket: WebSocket) {
        let (mut sender, mut receiver) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<ResponseMessage>();
        let session = self.accept(tx);
        let conn = session.id;

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let text = match codec::encode(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(connection = %conn, error = %e, "Failed to encode response");
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sender.close().await;
        });

        self.authenticate(&session).await;

        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_frame(&session, text.as_str()).await,
                Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                    Ok(text) => self.handle_frame(&session, text).await,
                    Err(_) if self.connections.state(conn) == Some(ConnectionState::Active) => {
                        self.connections.send(
                            conn,
                            ResponseMessage::error(
                                status::BAD_REQUEST,
                                "Invalid request",
                                "Binary frames must contain UTF-8 JSON",
                                None,
                            ),
                        );
                    }
                    Err(_) => warn!(connection = %conn, "Dropping frame on paused connection"),
                },
                Ok(Message::Close(_)) => break,
                // Ping/pong handled by axum
                Ok(_) => {}
                Err(e) => {
                    debug!(connection = %conn, error = %e, "WebSocket error");
                    break;
                }
            }
        }

        self.disconnect(&session).await;
        let _ = writer.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use vss_core::{GetRequest, HandlerResult, StoreError};

    struct ScriptedHandler {
        fail_connect: bool,
    }

    #[async_trait]
    impl Handler for ScriptedHandler {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn authenticate_and_connect(&self) -> HandlerResult<()> {
            if self.fail_connect {
                Err(StoreError::Authentication("bad credentials".to_string()).into())
            } else {
                Ok(())
            }
        }

        async fn get(&self, _conn: ConnectionId, req: &GetRequest) -> HandlerResult<ResponseMessage> {
            match req.instance.as_str() {
                "panic" => panic!("boom"),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(ResponseMessage::ok("late", req.request_id.clone()))
                }
                _ => Ok(ResponseMessage::Data {
                    instance: req.instance.clone(),
                    data: json!({"Speed": 10}),
                    metadata: None,
                    request_id: req.request_id.clone(),
                }),
            }
        }
    }

    struct ScriptedFactory {
        fail_connect: bool,
    }

    impl HandlerFactory for ScriptedFactory {
        fn create_handler(&self) -> Arc<dyn Handler> {
            Arc::new(ScriptedHandler {
                fail_connect: self.fail_connect,
            })
        }
    }

    fn dispatcher(fail_connect: bool) -> Dispatcher {
        Dispatcher::new(
            Arc::new(Connections::new()),
            Arc::new(ScriptedFactory { fail_connect }),
        )
        .with_request_timeout(Duration::from_millis(50))
    }

    fn get_frame(instance: &str) -> String {
        json!({"jsonrpc": "2.0", "method": "get", "id": "r1",
            "params": {"instance": instance, "schema": "Vehicle", "path": "Speed"}})
        .to_string()
    }

    #[tokio::test]
    async fn test_active_connection_gets_response() {
        let dispatcher = dispatcher(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = dispatcher.accept(tx);
        assert!(dispatcher.authenticate(&session).await);

        dispatcher.handle_frame(&session, &get_frame("VIN1")).await;
        match rx.try_recv().unwrap() {
            ResponseMessage::Data { request_id, .. } => assert_eq!(request_id, Some(json!("r1"))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_connection_paused() {
        let dispatcher = dispatcher(true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = dispatcher.accept(tx);
        assert!(!dispatcher.authenticate(&session).await);
        assert_eq!(
            dispatcher.connections().state(session.id),
            Some(ConnectionState::Paused)
        );

        dispatcher.handle_frame(&session, &get_frame("VIN1")).await;
        dispatcher.handle_frame(&session, "{oops").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_frame_rejected() {
        let dispatcher = dispatcher(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = dispatcher.accept(tx);
        dispatcher.authenticate(&session).await;

        dispatcher.handle_frame(&session, "{oops").await;
        match rx.try_recv().unwrap() {
            ResponseMessage::Error { code, reason, .. } => {
                assert_eq!(code, 400);
                assert_eq!(reason, "Invalid JSON format");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_yields_500() {
        let dispatcher = dispatcher(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = dispatcher.accept(tx);
        dispatcher.authenticate(&session).await;

        dispatcher.handle_frame(&session, &get_frame("panic")).await;
        match rx.try_recv().unwrap() {
            ResponseMessage::Error {
                code, request_id, ..
            } => {
                assert_eq!(code, 500);
                assert_eq!(request_id, Some(json!("r1")));
            }
            other => panic!("unexpected {:?}", other),
        }

        // Connection survives
        dispatcher.handle_frame(&session, &get_frame("VIN1")).await;
        assert!(matches!(rx.try_recv().unwrap(), ResponseMessage::Data { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out() {
        let dispatcher = dispatcher(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = dispatcher.accept(tx);
        dispatcher.authenticate(&session).await;

        dispatcher.handle_frame(&session, &get_frame("slow")).await;
        match rx.try_recv().unwrap() {
            ResponseMessage::Error { code, .. } => assert_eq!(code, 503),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_forgets_connection() {
        let dispatcher = dispatcher(false);
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = dispatcher.accept(tx);
        assert_eq!(dispatcher.connections().len(), 1);
        dispatcher.disconnect(&session).await;
        assert!(dispatcher.connections().is_empty());
    }
}
