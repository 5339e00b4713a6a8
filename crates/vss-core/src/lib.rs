//! vss-core - Core traits and types for the VSS datapoint gateway
//!
//! Holds everything the gateway crates share: path keys, the datapoint
//! catalog, domain/response messages, the response formatter, the storage
//! collaborator traits and the `Handler` contract.

pub mod catalog;
pub mod error;
pub mod format;
pub mod handler;
pub mod message;
pub mod path;
pub mod store;

pub use catalog::{CatalogError, DatapointCatalog, DEFAULT_ID_FIELD};
pub use error::{HandlerError, HandlerResult, StoreError, StoreResult};
pub use format::{format_response, Formatted};
pub use handler::{dispatch, Handler, HandlerFactory};
pub use message::{
    status, ConnectionId, DomainMessage, Format, GetRequest, NamedValue, PermissionsEditRequest,
    RequestId, ResponseMessage, Root, SetRequest, SubscribeRequest, TimeRange, Timestamp,
    TimeseriesGetRequest, UnsubscribeRequest,
};
pub use store::{ChangeEvent, ChangeFeed, DatapointStore, MessageSink, QueryResult, Sample, Series};
