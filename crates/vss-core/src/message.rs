//! Domain and response messages
//!
//! Both families are closed enums. The codec produces [`DomainMessage`]s and
//! consumes [`ResponseMessage`]s; handlers only ever see the typed forms.

use std::fmt;
use std::ops::Bound;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::HandlerError;

/// Wire status codes
pub mod status {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const NOT_IMPLEMENTED: u16 = 501;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// JSON-RPC request id, echoed verbatim (string or number)
pub type RequestId = Value;

/// Opaque identity of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Key prefix handling of a data response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Root {
    /// Keys keep the path below the schema root
    Absolute,
    /// Keys have the requested prefix stripped
    Relative,
}

/// Key structure of a data response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Flat,
    Nested,
}

/// Seconds/nanos pair used on the wire for every point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    #[serde(default)]
    pub nanos: u32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    pub fn now() -> Self {
        Utc::now().into()
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.seconds, self.nanos).single()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self {
            seconds: dt.timestamp(),
            nanos: dt.timestamp_subsec_nanos(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}.{:09}", self.seconds, self.nanos),
        }
    }
}

/// Time window for value queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub lower: Bound<Timestamp>,
    pub upper: Bound<Timestamp>,
}

impl TimeRange {
    /// `(lower, upper]`, the window covered by one poll tick
    pub fn after(lower: Timestamp, upper: Timestamp) -> Self {
        Self {
            lower: Bound::Excluded(lower),
            upper: Bound::Included(upper),
        }
    }

    /// Inclusive window with optional ends
    pub fn inclusive(gte: Option<Timestamp>, lte: Option<Timestamp>) -> Self {
        Self {
            lower: gte.map_or(Bound::Unbounded, Bound::Included),
            upper: lte.map_or(Bound::Unbounded, Bound::Included),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    pub fn contains(&self, ts: &Timestamp) -> bool {
        let above = match self.lower {
            Bound::Included(l) => *ts >= l,
            Bound::Excluded(l) => *ts > l,
            Bound::Unbounded => true,
        };
        let below = match self.upper {
            Bound::Included(u) => *ts <= u,
            Bound::Excluded(u) => *ts < u,
            Bound::Unbounded => true,
        };
        above && below
    }
}

/// A (name, value) pair as exchanged with storage collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    pub value: Value,
}

impl NamedValue {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetRequest {
    pub instance: String,
    pub path: String,
    pub root: Root,
    pub format: Format,
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetRequest {
    pub instance: String,
    pub path: String,
    /// Scalar for the exact path, or an object whose leaves sit below it
    pub data: Value,
    /// Relative dotted path (or `""`) to metadata value
    pub metadata: Option<Value>,
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeRequest {
    pub instance: String,
    pub path: String,
    pub root: Root,
    pub format: Format,
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnsubscribeRequest {
    pub instance: String,
    pub path: String,
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PermissionsEditRequest {
    pub instance: String,
    pub path: String,
    pub user_id: String,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub delete: Vec<String>,
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesGetRequest {
    pub instance: String,
    pub path: String,
    pub range: TimeRange,
    pub request_id: Option<RequestId>,
}

/// Validated request, `path` already in canonical key form
#[derive(Debug, Clone, PartialEq)]
pub enum DomainMessage {
    Get(GetRequest),
    Set(SetRequest),
    Subscribe(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
    PermissionsEdit(PermissionsEditRequest),
    TimeseriesGet(TimeseriesGetRequest),
}

impl DomainMessage {
    /// Wire method name
    pub fn method(&self) -> &'static str {
        match self {
            DomainMessage::Get(_) => "get",
            DomainMessage::Set(_) => "set",
            DomainMessage::Subscribe(_) => "subscribe",
            DomainMessage::Unsubscribe(_) => "unsubscribe",
            DomainMessage::PermissionsEdit(_) => "permissions/edit",
            DomainMessage::TimeseriesGet(_) => "timeseries/get",
        }
    }

    pub fn instance(&self) -> &str {
        match self {
            DomainMessage::Get(m) => &m.instance,
            DomainMessage::Set(m) => &m.instance,
            DomainMessage::Subscribe(m) => &m.instance,
            DomainMessage::Unsubscribe(m) => &m.instance,
            DomainMessage::PermissionsEdit(m) => &m.instance,
            DomainMessage::TimeseriesGet(m) => &m.instance,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            DomainMessage::Get(m) => &m.path,
            DomainMessage::Set(m) => &m.path,
            DomainMessage::Subscribe(m) => &m.path,
            DomainMessage::Unsubscribe(m) => &m.path,
            DomainMessage::PermissionsEdit(m) => &m.path,
            DomainMessage::TimeseriesGet(m) => &m.path,
        }
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            DomainMessage::Get(m) => m.request_id.as_ref(),
            DomainMessage::Set(m) => m.request_id.as_ref(),
            DomainMessage::Subscribe(m) => m.request_id.as_ref(),
            DomainMessage::Unsubscribe(m) => m.request_id.as_ref(),
            DomainMessage::PermissionsEdit(m) => m.request_id.as_ref(),
            DomainMessage::TimeseriesGet(m) => m.request_id.as_ref(),
        }
    }
}

/// Outbound message, serialized by the codec
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseMessage {
    Data {
        instance: String,
        data: Value,
        metadata: Option<Value>,
        request_id: Option<RequestId>,
    },
    Status {
        code: u16,
        message: String,
        request_id: Option<RequestId>,
        timestamp: Timestamp,
    },
    Error {
        code: u16,
        message: String,
        reason: String,
        request_id: Option<RequestId>,
    },
}

impl ResponseMessage {
    /// Status(OK) acknowledgement
    pub fn ok(message: impl Into<String>, request_id: Option<RequestId>) -> Self {
        ResponseMessage::Status {
            code: status::OK,
            message: message.into(),
            request_id,
            timestamp: Timestamp::now(),
        }
    }

    pub fn error(
        code: u16,
        message: impl Into<String>,
        reason: impl Into<String>,
        request_id: Option<RequestId>,
    ) -> Self {
        ResponseMessage::Error {
            code,
            message: message.into(),
            reason: reason.into(),
            request_id,
        }
    }

    pub fn from_error(err: &HandlerError, request_id: Option<RequestId>) -> Self {
        Self::error(err.status_code(), err.summary(), err.reason(), request_id)
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            ResponseMessage::Data { request_id, .. }
            | ResponseMessage::Status { request_id, .. }
            | ResponseMessage::Error { request_id, .. } => request_id.as_ref(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ResponseMessage::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_window_excludes_lower_includes_upper() {
        let range = TimeRange::after(Timestamp::new(10, 0), Timestamp::new(20, 0));
        assert!(!range.contains(&Timestamp::new(10, 0)));
        assert!(range.contains(&Timestamp::new(10, 1)));
        assert!(range.contains(&Timestamp::new(20, 0)));
        assert!(!range.contains(&Timestamp::new(20, 1)));
    }

    #[test]
    fn inclusive_window_with_open_end() {
        let range = TimeRange::inclusive(Some(Timestamp::new(5, 0)), None);
        assert!(range.contains(&Timestamp::new(5, 0)));
        assert!(range.contains(&Timestamp::new(i64::MAX, 0)));
        assert!(!range.contains(&Timestamp::new(4, 999_999_999)));
    }

    #[test]
    fn timestamp_roundtrips_through_chrono() {
        let ts = Timestamp::new(1_700_000_000, 123_000_000);
        let dt = ts.to_datetime().unwrap();
        assert_eq!(Timestamp::from(dt), ts);
    }

    #[test]
    fn timestamp_ordering_uses_nanos() {
        assert!(Timestamp::new(1, 5) < Timestamp::new(1, 6));
        assert!(Timestamp::new(1, 999) < Timestamp::new(2, 0));
    }

    #[test]
    fn error_response_carries_status_and_reason() {
        let err = HandlerError::UnknownPath("Vehicle_Nope".to_string());
        let msg = ResponseMessage::from_error(&err, Some(Value::from("7")));
        match msg {
            ResponseMessage::Error {
                code,
                message,
                reason,
                request_id,
            } => {
                assert_eq!(code, 404);
                assert_eq!(message, "Not found");
                assert!(reason.contains("Vehicle.Nope"));
                assert_eq!(request_id, Some(Value::from("7")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn domain_message_accessors() {
        let msg = DomainMessage::Unsubscribe(UnsubscribeRequest {
            instance: "VIN1".to_string(),
            path: "Vehicle_Speed".to_string(),
            request_id: None,
        });
        assert_eq!(msg.method(), "unsubscribe");
        assert_eq!(msg.instance(), "VIN1");
        assert_eq!(msg.path(), "Vehicle_Speed");
        assert!(msg.request_id().is_none());
    }
}
