//! vss-router - WebSocket front end of the VSS datapoint gateway
//!
//! Accepts JSON-RPC frames over WebSocket, validates them into domain
//! messages and routes them to the connection's handler.

pub mod codec;
pub mod connection;
pub mod dispatcher;

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use codec::{decode, encode, Rejection};
pub use connection::{ConnectionState, Connections};
pub use dispatcher::{Dispatcher, Session, DEFAULT_REQUEST_TIMEOUT};

/// Create the gateway router
///
/// `/` upgrades to the JSON-RPC WebSocket, `/health` answers plain `OK`.
pub fn create_router(dispatcher: Arc<Dispatcher>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(ws_upgrade))
        .route("/health", get(|| async { "OK" }))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(dispatcher): State<Arc<Dispatcher>>) -> Response {
    ws.on_upgrade(move |socket| dispatcher.serve(socket))
}
