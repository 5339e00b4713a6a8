//! Per-connection interest sets shared by both registries
//!
//! Invariant: a `(connection, instance)` entry exists iff its datapoint set
//! is non-empty. The table itself is not synchronized; each registry keeps
//! it behind its own lock.

use std::collections::{BTreeSet, HashMap};

use vss_core::{
    ConnectionId, Format, HandlerError, HandlerResult, RequestId, Root, SubscribeRequest,
};

/// Interest of one connection in one instance
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub datapoints: BTreeSet<String>,
    /// Canonical path of the latest subscribe request
    pub path: String,
    pub root: Root,
    pub format: Format,
    /// Id of the latest subscribe request, echoed on poll deliveries
    pub request_id: Option<RequestId>,
}

/// Outcome of a successful unsubscribe
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    pub removed: Vec<String>,
    /// The entry became empty and was deleted
    pub entry_dropped: bool,
}

#[derive(Debug, Default)]
pub struct SubscriptionTable {
    connections: HashMap<ConnectionId, HashMap<String, Subscription>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `resolved` into the entry of `(conn, req.instance)`.
    ///
    /// Returns the datapoints that were not subscribed before. Fails with
    /// `AlreadySubscribed` (table unchanged) when there are none. Otherwise
    /// the request's path, root, format and id replace the stored ones.
    pub fn subscribe(
        &mut self,
        conn: ConnectionId,
        req: &SubscribeRequest,
        resolved: &[String],
    ) -> HandlerResult<Vec<String>> {
        let instance = req.instance.as_str();
        let existing = self
            .connections
            .get(&conn)
            .and_then(|per_instance| per_instance.get(instance));

        let new_points: Vec<String> = resolved
            .iter()
            .filter(|p| existing.map_or(true, |s| !s.datapoints.contains(*p)))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if new_points.is_empty() {
            return Err(HandlerError::AlreadySubscribed {
                instance: instance.to_string(),
                datapoints: resolved.to_vec(),
            });
        }

        let entry = self
            .connections
            .entry(conn)
            .or_default()
            .entry(instance.to_string())
            .or_insert_with(|| Subscription {
                datapoints: BTreeSet::new(),
                path: req.path.clone(),
                root: req.root,
                format: req.format,
                request_id: None,
            });
        entry.datapoints.extend(new_points.iter().cloned());
        entry.path = req.path.clone();
        entry.root = req.root;
        entry.format = req.format;
        entry.request_id = req.request_id.clone();

        Ok(new_points)
    }

    /// Remove the intersection of `resolved` and the entry of `(conn, instance)`
    pub fn unsubscribe(
        &mut self,
        conn: ConnectionId,
        instance: &str,
        resolved: &[String],
    ) -> HandlerResult<Removal> {
        let Some(per_instance) = self.connections.get_mut(&conn) else {
            return Err(HandlerError::NotSubscribed(instance.to_string()));
        };
        let Some(subscription) = per_instance.get_mut(instance) else {
            return Err(HandlerError::NotSubscribed(instance.to_string()));
        };

        let removed: Vec<String> = resolved
            .iter()
            .filter(|p| subscription.datapoints.remove(*p))
            .cloned()
            .collect();
        if removed.is_empty() {
            return Err(HandlerError::NotSubscribedDatapoints {
                instance: instance.to_string(),
                datapoints: resolved.to_vec(),
            });
        }

        let entry_dropped = subscription.datapoints.is_empty();
        if entry_dropped {
            per_instance.remove(instance);
            if per_instance.is_empty() {
                self.connections.remove(&conn);
            }
        }

        Ok(Removal {
            removed,
            entry_dropped,
        })
    }

    /// Drop every entry of `conn`, returning the instances it watched.
    /// Calling it for an unknown connection is a no-op.
    pub fn remove_connection(&mut self, conn: ConnectionId) -> Vec<String> {
        self.connections
            .remove(&conn)
            .map(|per_instance| per_instance.into_keys().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, conn: ConnectionId, instance: &str) -> Option<&Subscription> {
        self.connections.get(&conn)?.get(instance)
    }

    /// True when any connection is subscribed to `instance`
    pub fn is_watched(&self, instance: &str) -> bool {
        self.connections
            .values()
            .any(|per_instance| per_instance.contains_key(instance))
    }

    /// Connections subscribed to `instance`
    pub fn subscribers<'a>(
        &'a self,
        instance: &'a str,
    ) -> impl Iterator<Item = (ConnectionId, &'a Subscription)> + 'a {
        self.connections
            .iter()
            .filter_map(move |(conn, per_instance)| per_instance.get(instance).map(|s| (*conn, s)))
    }

    /// Snapshot of all entries
    pub fn entries(&self) -> Vec<(ConnectionId, String, Subscription)> {
        self.connections
            .iter()
            .flat_map(|(conn, per_instance)| {
                per_instance
                    .iter()
                    .map(move |(instance, s)| (*conn, instance.clone(), s.clone()))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of `(connection, instance)` entries
    pub fn len(&self) -> usize {
        self.connections.values().map(HashMap::len).sum()
    }
}
