//! In-memory document store with change notifications
//!
//! One document per instance, holding the latest value (and metadata) of
//! every written datapoint. Each write emits a change event naming the
//! properties it touched; removing an instance emits a deletion event.
//! A feed is dropped once its last watcher is gone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use vss_core::{
    ChangeEvent, ChangeFeed, DatapointCatalog, DatapointStore, NamedValue, QueryResult,
    StoreError, StoreResult, TimeRange,
};

const FEED_CAPACITY: usize = 256;

#[derive(Debug, Default, Clone)]
struct Document {
    values: HashMap<String, Value>,
    metadata: HashMap<String, Value>,
}

pub struct MemoryDocumentStore {
    catalog: DatapointCatalog,
    connected: AtomicBool,
    documents: RwLock<HashMap<String, Document>>,
    feeds: RwLock<HashMap<String, broadcast::Sender<ChangeEvent>>>,
}

impl MemoryDocumentStore {
    pub fn new(catalog: DatapointCatalog) -> Self {
        Self {
            catalog,
            connected: AtomicBool::new(false),
            documents: RwLock::new(HashMap::new()),
            feeds: RwLock::new(HashMap::new()),
        }
    }

    fn ensure_connected(&self) -> StoreResult<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }

    fn publish(&self, event: ChangeEvent) {
        let mut feeds = self.feeds.write();
        let Some(tx) = feeds.get(&event.instance) else {
            return;
        };
        if tx.send(event).is_err() {
            // Every watcher is gone
            feeds.retain(|_, tx| tx.receiver_count() > 0);
        }
    }

    /// Close the change feed of `instance`; its watchers see the feed end.
    pub fn close_feed(&self, instance: &str) -> bool {
        let closed = self.feeds.write().remove(instance).is_some();
        if closed {
            debug!(instance, "Closed change feed");
        }
        closed
    }

    /// Number of instances with an open change feed
    pub fn feed_count(&self) -> usize {
        self.feeds.read().len()
    }

    /// Remove an instance document, notifying watchers
    pub fn delete_instance(&self, instance: &str) -> bool {
        let removed = self.documents.write().remove(instance).is_some();
        if removed {
            debug!(instance, "Deleted document");
            self.publish(ChangeEvent {
                instance: instance.to_string(),
                deleted: true,
                changed: Vec::new(),
                metadata: Vec::new(),
            });
        }
        removed
    }
}

#[async_trait]
impl DatapointStore for MemoryDocumentStore {
    fn name(&self) -> &str {
        "memory-document"
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
        if range.is_some() {
            return Err(StoreError::NotSupported(
                "time range queries on documents".to_string(),
            ));
        }

        let documents = self.documents.read();
        let Some(doc) = documents.get(instance) else {
            return Ok(QueryResult::default());
        };

        let values = datapoints
            .iter()
            .filter_map(|p| {
                doc.values
                    .get(p)
                    .filter(|v| !v.is_null())
                    .map(|v| NamedValue::new(p.clone(), v.clone()))
            })
            .collect::<Vec<_>>();
        let metadata = values
            .iter()
            .filter_map(|v| {
                doc.metadata
                    .get(&v.name)
                    .map(|m| NamedValue::new(v.name.clone(), m.clone()))
            })
            .collect();

        Ok(QueryResult { values, metadata })
    }

    async fn write_values(
        &self,
        instance: &str,
        values: &[NamedValue],
        metadata: &[NamedValue],
    ) -> StoreResult<()> {
        self.ensure_connected()?;
        {
            let mut documents = self.documents.write();
            let doc = documents.entry(instance.to_string()).or_default();
            for v in values {
                doc.values.insert(v.name.clone(), v.value.clone());
            }
            for m in metadata {
                doc.metadata.insert(m.name.clone(), m.value.clone());
            }
        }

        self.publish(ChangeEvent {
            instance: instance.to_string(),
            deleted: false,
            changed: values.to_vec(),
            metadata: metadata.to_vec(),
        });
        Ok(())
    }
}

impl ChangeFeed for MemoryDocumentStore {
    fn watch(&self, instance: &str) -> broadcast::Receiver<ChangeEvent> {
        let mut feeds = self.feeds.write();
        feeds.retain(|_, tx| tx.receiver_count() > 0);
        feeds
            .entry(instance.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe()
    }
}
