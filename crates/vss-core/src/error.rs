//! Common error types for handlers and storage collaborators

use thiserror::Error;

use crate::message::status;
use crate::path::display_list;

/// Result type for storage collaborator operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for handler operations
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Errors raised by a storage backend
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Operation attempted before `connect()` succeeded
    #[error("Store is not connected")]
    NotConnected,

    /// Credentials were rejected or the session could not be opened
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Reading values failed
    #[error("Query failed: {0}")]
    Query(String),

    /// Writing values failed
    #[error("Write failed: {0}")]
    Write(String),

    /// No document/rows exist for the instance
    #[error("Unknown instance: {0}")]
    UnknownInstance(String),

    /// Operation not offered by this store
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

/// Errors produced while serving a domain message
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No declared datapoint starts with the requested prefix (canonical key)
    #[error("There are no known datapoints with prefix {}", crate::path::to_dotted(.0))]
    UnknownPath(String),

    /// Leaves of a `set` payload that are not declared datapoints
    #[error("Could not find node: {}", display_list(.0))]
    UnknownNode(Vec<String>),

    /// The store holds no values for the resolved datapoints
    #[error("No values found for dataPoints [{}] for the instance: {instance}", display_list(.datapoints))]
    DataNotFound {
        instance: String,
        datapoints: Vec<String>,
    },

    /// Every requested datapoint is already part of the subscription
    #[error("Already subscribed to instance '{instance}' and datapoints [{}]", display_list(.datapoints))]
    AlreadySubscribed {
        instance: String,
        datapoints: Vec<String>,
    },

    /// The connection holds no subscription for the instance
    #[error("Cannot unsubscribe. No subscription for instance '{0}'")]
    NotSubscribed(String),

    /// None of the requested datapoints are currently subscribed
    #[error("Cannot unsubscribe. No subscription for instance '{instance}' and datapoints [{}]", display_list(.datapoints))]
    NotSubscribedDatapoints {
        instance: String,
        datapoints: Vec<String>,
    },

    /// Capability not offered by this handler
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Request is well-formed but cannot be served as given
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Storage collaborator failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The handler did not answer in time
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Returns the wire status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            HandlerError::UnknownPath(_) => status::NOT_FOUND,
            HandlerError::UnknownNode(_) => status::NOT_FOUND,
            HandlerError::DataNotFound { .. } => status::NOT_FOUND,
            HandlerError::AlreadySubscribed { .. } => status::BAD_REQUEST,
            HandlerError::NotSubscribed(_) => status::NOT_FOUND,
            HandlerError::NotSubscribedDatapoints { .. } => status::NOT_FOUND,
            HandlerError::NotSupported(_) => status::NOT_IMPLEMENTED,
            HandlerError::InvalidRequest(_) => status::BAD_REQUEST,
            HandlerError::Store(_) => status::SERVICE_UNAVAILABLE,
            HandlerError::Timeout(_) => status::SERVICE_UNAVAILABLE,
            HandlerError::Internal(_) => status::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short summary used as the error `message`
    pub fn summary(&self) -> String {
        match self {
            HandlerError::UnknownPath(_) | HandlerError::UnknownNode(_) => "Not found".to_string(),
            HandlerError::DataNotFound { .. } => "Data not found".to_string(),
            HandlerError::AlreadySubscribed { .. } => "Subscription failed".to_string(),
            // Clients match on the "Cannot unsubscribe" text, so it goes in the message
            HandlerError::NotSubscribed(_) | HandlerError::NotSubscribedDatapoints { .. } => {
                self.to_string()
            }
            HandlerError::NotSupported(_) => "Not implemented".to_string(),
            HandlerError::InvalidRequest(_) => "Bad request".to_string(),
            HandlerError::Store(_) | HandlerError::Timeout(_) => {
                "Service unavailable".to_string()
            }
            HandlerError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// Descriptive reason placed in `error.data.reason`
    pub fn reason(&self) -> String {
        match self {
            HandlerError::NotSubscribed(_) | HandlerError::NotSubscribedDatapoints { .. } => {
                "Subscription not found".to_string()
            }
            HandlerError::Store(e) => e.to_string(),
            _ => self.to_string(),
        }
    }
}
