//! In-memory time-series store (pull only)
//!
//! Keeps an append-only list of timestamped rows per instance. Queries return
//! the latest non-null value per datapoint within the requested window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use vss_core::{
    DatapointCatalog, DatapointStore, NamedValue, QueryResult, Sample, Series, StoreError,
    StoreResult, TimeRange, Timestamp,
};

#[derive(Debug, Clone)]
struct Row {
    ts: Timestamp,
    values: Vec<NamedValue>,
    metadata: Vec<NamedValue>,
}

pub struct MemoryTimeseriesStore {
    catalog: DatapointCatalog,
    connected: AtomicBool,
    /// Rows per instance, ordered by timestamp
    rows: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryTimeseriesStore {
    pub fn new(catalog: DatapointCatalog) -> Self {
        Self {
            catalog,
            connected: AtomicBool::new(false),
            rows: RwLock::new(HashMap::new()),
        }
    }

    fn ensure_connected(&self) -> StoreResult<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }

    /// Append a row at an explicit time
    pub fn insert_at(
        &self,
        instance: &str,
        ts: Timestamp,
        values: Vec<NamedValue>,
        metadata: Vec<NamedValue>,
    ) {
        let mut rows = self.rows.write();
        let series = rows.entry(instance.to_string()).or_default();
        let pos = series.partition_point(|r| r.ts <= ts);
        series.insert(
            pos,
            Row {
                ts,
                values,
                metadata,
            },
        );
    }

    fn rows_in<'a>(rows: &'a [Row], range: Option<&'a TimeRange>) -> impl Iterator<Item = &'a Row> {
        rows.iter()
            .filter(move |r| range.map_or(true, |range| range.contains(&r.ts)))
    }
}

#[async_trait]
impl DatapointStore for MemoryTimeseriesStore {
    fn name(&self) -> &str {
        "memory-timeseries"
    }

    async fn connect(&self) -> StoreResult<()> {
        if !self.connected.swap(true, Ordering::AcqRel) {
            info!(store = self.name(), "Connected");
        }
        Ok(())
    }

    fn catalog(&self) -> &DatapointCatalog {
        &self.catalog
    }

    async fn query_values(
        &self,
        instance: &str,
        datapoints: &[String],
        range: Option<&TimeRange>,
    ) -> StoreResult<QueryResult> {
        self.ensure_connected()?;
        let rows = self.rows.read();
        let Some(series) = rows.get(instance) else {
            return Ok(QueryResult::default());
        };

        let mut latest: HashMap<&str, &NamedValue> = HashMap::new();
        let mut latest_meta: HashMap<&str, &NamedValue> = HashMap::new();
        for row in Self::rows_in(series, range) {
            for v in &row.values {
                if !v.value.is_null() && datapoints.contains(&v.name) {
                    latest.insert(&v.name, v);
                }
            }
            for m in &row.metadata {
                if !m.value.is_null() && datapoints.contains(&m.name) {
                    latest_meta.insert(&m.name, m);
                }
            }
        }

        // Keep the requested order
        let values: Vec<NamedValue> = datapoints
            .iter()
            .filter_map(|p| latest.get(p.as_str()).map(|v| (*v).clone()))
            .collect();
        let metadata: Vec<NamedValue> = datapoints
            .iter()
            .filter(|p| latest.contains_key(p.as_str()))
            .filter_map(|p| latest_meta.get(p.as_str()).map(|m| (*m).clone()))
            .collect();

        debug!(instance, found = values.len(), "Queried latest values");
        Ok(QueryResult { values, metadata })
    }

    async fn write_values(
        &self,
        instance: &str,
        values: &[NamedValue],
        metadata: &[NamedValue],
    ) -> StoreResult<()> {
        self.ensure_connected()?;
        self.insert_at(instance, Timestamp::now(), values.to_vec(), metadata.to_vec());
        Ok(())
    }

    async fn query_series(
        &self,
        instance: &str,
        datapoints: &[String],
        range: &TimeRange,
    ) -> StoreResult<Vec<Series>> {
        self.ensure_connected()?;
        let rows = self.rows.read();
        let Some(series) = rows.get(instance) else {
            return Ok(Vec::new());
        };

        let mut out: Vec<Series> = datapoints
            .iter()
            .map(|p| Series {
                name: p.clone(),
                samples: Vec::new(),
            })
            .collect();
        for row in Self::rows_in(series, Some(range)) {
            for v in row.values.iter().filter(|v| !v.value.is_null()) {
                if let Some(s) = out.iter_mut().find(|s| s.name == v.name) {
                    s.samples.push(Sample {
                        ts: row.ts,
                        value: v.value.clone(),
                    });
                }
            }
        }
        out.retain(|s| !s.samples.is_empty());
        Ok(out)
    }
}
