//! Poll subscription registry
//!
//! For pull-only stores. A single ticker task is shared by all subscriptions:
//! it starts with the first subscription anywhere and stops as soon as the
//! table is empty again. Each tick queries `(lower, upper]` for every entry
//! and only then advances the shared cursor, so consecutive ticks partition
//! time without gaps or overlaps.
//!
//! The cursor lives in the synchronous registry state. Restarting the ticker
//! resets it in place and bumps an epoch; a tick still in flight from the
//! previous run sees the new epoch and neither delivers nor moves the cursor.
//! Subscribing therefore never waits for a slow store.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use vss_core::path::display_list;
use vss_core::{
    format_response, ConnectionId, DatapointStore, HandlerError, HandlerResult, MessageSink,
    NamedValue, ResponseMessage, SubscribeRequest, TimeRange, Timestamp, UnsubscribeRequest,
};

use super::table::SubscriptionTable;

/// Default tick period
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

struct Ticker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct PollState {
    table: SubscriptionTable,
    ticker: Option<Ticker>,
    /// Lower bound of the next window
    cursor: Timestamp,
    /// Bumped on every cursor reset
    epoch: u64,
}

impl PollState {
    fn reset_cursor(&mut self, lower: Timestamp) {
        self.cursor = lower;
        self.epoch = self.epoch.wrapping_add(1);
    }
}

struct PollInner {
    store: Arc<dyn DatapointStore>,
    sink: Arc<dyn MessageSink>,
    interval: Duration,
    state: Mutex<PollState>,
    /// Held for a whole tick so ticks never overlap
    tick_lock: AsyncMutex<()>,
}

/// Subscription registry driven by a periodic diff query
#[derive(Clone)]
pub struct PollRegistry {
    inner: Arc<PollInner>,
}

impl PollRegistry {
    pub fn new(
        store: Arc<dyn DatapointStore>,
        sink: Arc<dyn MessageSink>,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PollInner {
                store,
                sink,
                interval,
                state: Mutex::new(PollState {
                    table: SubscriptionTable::new(),
                    ticker: None,
                    cursor: Timestamp::now(),
                    epoch: 0,
                }),
                tick_lock: AsyncMutex::new(()),
            }),
        }
    }

    fn resolve(&self, path: &str) -> HandlerResult<Vec<String>> {
        let resolved = self.inner.store.catalog().resolve(path);
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

        let mut state = self.inner.state.lock();
        let added = state.table.subscribe(conn, req, &resolved)?;
        debug!(
            connection = %conn,
            instance = %req.instance,
            datapoints = ?state.table.get(conn, &req.instance).map(|s| &s.datapoints),
            "Subscription updated"
        );
        if state.ticker.is_none() {
            state.reset_cursor(Timestamp::now());
            state.ticker = Some(self.spawn_ticker());
            info!(interval_ms = self.inner.interval.as_millis() as u64, "Started poll ticker");
        }

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

        let mut state = self.inner.state.lock();
        let removal = state.table.unsubscribe(conn, &req.instance, &resolved)?;
        debug!(
            connection = %conn,
            instance = %req.instance,
            removed = ?removal.removed,
            "Subscription reduced"
        );
        stop_if_idle(&mut state);

        Ok(ResponseMessage::ok(
            "Successfully unsubscribed",
            req.request_id.clone(),
        ))
    }

    /// Drop all subscriptions of `conn`. Idempotent.
    pub fn remove_connection(&self, conn: ConnectionId) {
        let mut state = self.inner.state.lock();
        let instances = state.table.remove_connection(conn);
        if !instances.is_empty() {
            debug!(connection = %conn, instances = ?instances, "Removed client subscriptions");
        }
        stop_if_idle(&mut state);
    }

    /// True while the shared ticker is scheduled
    pub fn is_polling(&self) -> bool {
        self.inner.state.lock().ticker.is_some()
    }

    pub fn is_subscribed(&self, conn: ConnectionId, instance: &str) -> bool {
        self.inner.state.lock().table.get(conn, instance).is_some()
    }

    /// Stop the ticker and forget all subscriptions
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.table = SubscriptionTable::new();
        stop_if_idle(&mut state);
    }

    /// Move the lower bound of the next window.
    ///
    /// A tick in flight when this is called is discarded.
    pub fn reset_cursor(&self, lower: Timestamp) {
        self.inner.state.lock().reset_cursor(lower);
    }

    /// Run one poll cycle ending at `upper`.
    ///
    /// Queries every entry over `(lower, upper]` concurrently, delivers one
    /// data message per entry with changes, then sets `lower = upper`.
    /// Returns the number of messages delivered.
    pub async fn tick(&self, upper: Timestamp) -> usize {
        let _running = self.inner.tick_lock.lock().await;
        let (range, epoch, entries) = {
            let state = self.inner.state.lock();
            (
                TimeRange::after(state.cursor, upper),
                state.epoch,
                state.table.entries(),
            )
        };

        let store = self.inner.store.as_ref();
        let queries = entries.iter().map(|(conn, instance, subscription)| async move {
            let points: Vec<String> = subscription.datapoints.iter().cloned().collect();
            let result = store.query_values(instance, &points, Some(&range)).await;
            (*conn, instance, subscription, result)
        });
        let results = join_all(queries).await;

        if self.inner.state.lock().epoch != epoch {
            debug!("Cursor reset during tick, discarding results");
            return 0;
        }

        let mut delivered = 0;
        for (conn, instance, subscription, result) in results {
            let result = match result {
                Ok(result) => result,
                Err(e) => {
                    warn!(connection = %conn, instance = %instance, error = %e, "Poll query failed");
                    continue;
                }
            };

            let changed: Vec<NamedValue> = {
                let state = self.inner.state.lock();
                // Entry may have shrunk or gone while the query was in flight
                let Some(current) = state.table.get(conn, instance) else {
                    continue;
                };
                result
                    .values
                    .into_iter()
                    .filter(|v| !v.value.is_null() && current.datapoints.contains(&v.name))
                    .collect()
            };
            if changed.is_empty() {
                continue;
            }
            let metadata: Vec<NamedValue> = result
                .metadata
                .into_iter()
                .filter(|m| changed.iter().any(|v| v.name == m.name))
                .collect();

            let Some(formatted) = format_response(
                &subscription.path,
                &changed,
                &metadata,
                subscription.root,
                subscription.format,
            ) else {
                continue;
            };

            if self.inner.sink.deliver(
                conn,
                ResponseMessage::Data {
                    instance: instance.clone(),
                    data: formatted.data,
                    metadata: formatted.metadata,
                    request_id: subscription.request_id.clone(),
                },
            ) {
                delivered += 1;
            }
        }

        let mut state = self.inner.state.lock();
        if state.epoch == epoch {
            state.cursor = upper;
        }
        delivered
    }

    fn spawn_ticker(&self) -> Ticker {
        let (stop, mut stop_rx) = oneshot::channel();
        let weak: Weak<PollInner> = Arc::downgrade(&self.inner);
        let period = self.inner.interval;

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        let delivered = PollRegistry { inner }.tick(Timestamp::now()).await;
                        if delivered > 0 {
                            debug!(delivered, "Poll tick delivered updates");
                        }
                    }
                }
            }
            debug!("Poll ticker stopped");
        });

        Ticker { stop, handle }
    }
}

fn stop_if_idle(state: &mut PollState) {
    if !state.table.is_empty() {
        return;
    }
    if let Some(ticker) = state.ticker.take() {
        // An in-flight tick finishes; no further ticks are scheduled
        let _ = ticker.stop.send(());
        drop(ticker.handle);
        info!("Stopped poll ticker");
    }
}
