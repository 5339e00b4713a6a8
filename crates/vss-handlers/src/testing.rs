//! Test doubles shared by the unit tests of this crate

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use vss_core::{
    ConnectionId, DatapointCatalog, DatapointStore, MessageSink, NamedValue, QueryResult,
    ResponseMessage, StoreError, StoreResult, TimeRange, Timestamp, DEFAULT_ID_FIELD,
};

use crate::memory::MemoryTimeseriesStore;

const TREE: &str = r#"
Vehicle:
  type: branch
  children:
    Speed:
      datatype: float
    CurrentLocation:
      children:
        Latitude:
          datatype: double
        Longitude:
          datatype: double
    Cabin:
      children:
        Temperature:
          datatype: float
    VehicleIdentification:
      children:
        VIN:
          datatype: string
"#;

pub fn catalog() -> DatapointCatalog {
    DatapointCatalog::from_yaml_str(TREE, DEFAULT_ID_FIELD).unwrap()
}

/// Sink that keeps every delivered message
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<(ConnectionId, ResponseMessage)>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<(ConnectionId, ResponseMessage)> {
        std::mem::take(&mut *self.delivered.lock())
    }
}

impl MessageSink for RecordingSink {
    fn deliver(&self, connection: ConnectionId, message: ResponseMessage) -> bool {
        self.delivered.lock().push((connection, message));
        true
    }
}

/// Time-series store that records the window of every query
pub struct RecordingStore {
    inner: MemoryTimeseriesStore,
    windows: Mutex<Vec<TimeRange>>,
    fail: AtomicBool,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingStore {
    pub fn new(catalog: DatapointCatalog) -> Self {
        Self {
            inner: MemoryTimeseriesStore::new(catalog),
            windows: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn record(&self, instance: &str, ts: Timestamp, name: &str, value: Value) {
        self.inner
            .insert_at(instance, ts, vec![NamedValue::new(name, value)], vec![]);
    }

    pub fn windows(&self) -> Vec<TimeRange> {
        self.windows.lock().clone()
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make every query take `delay` before answering
    pub fn slow_queries(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Highest number of queries seen running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatapointStore for RecordingStore {
    fn name(&self) -> &str {
        "recording"
    }

    async fn connect(&self) -> StoreResult<()> {
        self.inner.connect().await
    }

    fn catalog(&self) -> &DatapointCatalog {
        self.inner.catalog()
    }

    async fn query_values(
        &self,
        instance: &str,
        datapoints: &[String],
        range: Option<&TimeRange>,
    ) -> StoreResult<QueryResult> {
        if let Some(range) = range {
            self.windows.lock().push(*range);
        }
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = if self.fail.load(Ordering::SeqCst) {
            Err(StoreError::Query("injected failure".to_string()))
        } else {
            match self.inner.connect().await {
                Ok(()) => self.inner.query_values(instance, datapoints, range).await,
                Err(e) => Err(e),
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn write_values(
        &self,
        instance: &str,
        values: &[NamedValue],
        metadata: &[NamedValue],
    ) -> StoreResult<()> {
        self.inner.connect().await?;
        self.inner.write_values(instance, values, metadata).await
    }
}
