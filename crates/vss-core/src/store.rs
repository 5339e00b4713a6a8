//! Storage collaborator traits
//!
//! Concrete drivers (document store, time-series store) live outside the
//! core and are consumed through these traits.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::catalog::DatapointCatalog;
use crate::error::{StoreError, StoreResult};
use crate::message::{ConnectionId, NamedValue, ResponseMessage, TimeRange, Timestamp};

/// Values and metadata returned by a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub values: Vec<NamedValue>,
    pub metadata: Vec<NamedValue>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One stored sample of a time series
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub ts: Timestamp,
    pub value: Value,
}

/// Sample list per datapoint
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub samples: Vec<Sample>,
}

/// Change notification emitted by a push-capable store
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub instance: String,
    /// The instance was removed; never turned into data deliveries
    pub deleted: bool,
    /// Changed properties with their new values, canonical keys
    pub changed: Vec<NamedValue>,
    pub metadata: Vec<NamedValue>,
}

/// A pull-based storage backend
#[async_trait]
pub trait DatapointStore: Send + Sync {
    /// Store name for logs
    fn name(&self) -> &str;

    /// Establish the backend session. Idempotent when already connected.
    async fn connect(&self) -> StoreResult<()>;

    fn catalog(&self) -> &DatapointCatalog;

    /// Latest values of `datapoints`, restricted to `range` when given.
    /// Datapoints without a value in range are omitted.
    async fn query_values(
        &self,
        instance: &str,
        datapoints: &[String],
        range: Option<&TimeRange>,
    ) -> StoreResult<QueryResult>;

    /// Write values (and per-datapoint metadata) for one instance
    async fn write_values(
        &self,
        instance: &str,
        values: &[NamedValue],
        metadata: &[NamedValue],
    ) -> StoreResult<()>;

    /// Full sample lists of `datapoints` within `range`
    async fn query_series(
        &self,
        _instance: &str,
        _datapoints: &[String],
        _range: &TimeRange,
    ) -> StoreResult<Vec<Series>> {
        Err(StoreError::NotSupported("query_series".to_string()))
    }
}

/// A store that can notify about changes to an instance
pub trait ChangeFeed: DatapointStore {
    /// Subscribe to change events of `instance`. Dropping the receiver detaches.
    fn watch(&self, instance: &str) -> broadcast::Receiver<ChangeEvent>;
}

/// Outbound path to connected clients
pub trait MessageSink: Send + Sync {
    /// Queue a message for `connection`. Returns false when it is gone.
    fn deliver(&self, connection: ConnectionId, message: ResponseMessage) -> bool;
}
