//! Protocol codec
//!
//! Turns raw JSON-RPC frames into validated [`DomainMessage`]s and
//! serializes [`ResponseMessage`]s back into wire envelopes. Validation
//! failures never reach a handler; they come back as a [`Rejection`].

mod dto;
mod schema;

use serde_json::{Map, Value};

use vss_core::path::canonical_path;
use vss_core::{
    status, DomainMessage, Format, GetRequest, PermissionsEditRequest, RequestId,
    ResponseMessage, Root, SetRequest, SubscribeRequest, TimeRange, TimeseriesGetRequest,
    UnsubscribeRequest,
};

use dto::{
    DataResponseDto, DataResultDto, EmptyResult, ErrorBodyDto, ErrorDataDto, ErrorResponseDto,
    OkResponseDto, ParamsDto, JSONRPC_VERSION,
};
pub use schema::Method;

/// A frame that failed validation
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub errors: Vec<String>,
    /// Request id, when it could be read
    pub id: Option<RequestId>,
}

impl Rejection {
    fn single(error: impl Into<String>, id: Option<RequestId>) -> Self {
        Self {
            errors: vec![error.into()],
            id,
        }
    }

    /// The 400 error response reported to the client
    pub fn into_response(self) -> ResponseMessage {
        ResponseMessage::error(
            status::BAD_REQUEST,
            "Invalid request",
            self.errors.join("; "),
            self.id,
        )
    }
}

/// Parse and validate one inbound frame
pub fn decode(raw: &str) -> Result<DomainMessage, Rejection> {
    let value: Value =
        serde_json::from_str(raw).map_err(|_| Rejection::single("Invalid JSON format", None))?;
    let Value::Object(mut envelope) = value else {
        return Err(Rejection::single("The request must be a JSON object", None));
    };

    let id = match envelope.remove("id") {
        None | Some(Value::Null) => None,
        Some(id @ (Value::String(_) | Value::Number(_))) => Some(id),
        Some(_) => {
            return Err(Rejection::single(
                "The 'id' field must be a string or number",
                None,
            ))
        }
    };

    let mut errors = Vec::new();
    match envelope.remove("jsonrpc") {
        None => {}
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        Some(_) => errors.push(format!("The 'jsonrpc' field must be \"{}\"", JSONRPC_VERSION)),
    }

    let method = match envelope.remove("method") {
        None => {
            errors.push("The 'method' field is required".to_string());
            None
        }
        Some(Value::String(name)) => match Method::parse(&name) {
            Some(method) => Some(method),
            None => {
                errors.push(format!("Unknown method: {}", name));
                None
            }
        },
        Some(_) => {
            errors.push("The 'method' field must be a string".to_string());
            None
        }
    };

    let params = match envelope.remove("params") {
        Some(Value::Object(params)) => Some(params),
        None => {
            errors.push("The 'params' field is required".to_string());
            None
        }
        Some(_) => {
            errors.push("The 'params' field must be an object".to_string());
            None
        }
    };

    for key in envelope.keys() {
        errors.push(format!("Unexpected property found: '{}'", key));
    }

    if let (Some(method), Some(params)) = (method, params.as_ref()) {
        errors.extend(schema::check_params(method, params));
    }

    match (method, params) {
        (Some(method), Some(params)) if errors.is_empty() => to_domain(method, params, id),
        _ => Err(Rejection { errors, id }),
    }
}

fn to_domain(
    method: Method,
    params: Map<String, Value>,
    id: Option<RequestId>,
) -> Result<DomainMessage, Rejection> {
    let params: ParamsDto = serde_json::from_value(Value::Object(params))
        .map_err(|e| Rejection::single(e.to_string(), id.clone()))?;

    let instance = params.instance.unwrap_or_default();
    let path = match params.schema.as_deref() {
        Some(schema) => canonical_path(schema, params.path.as_deref()),
        None => params
            .path
            .as_deref()
            .map(vss_core::path::to_key)
            .unwrap_or_default(),
    };

    let message = match method {
        Method::Get => DomainMessage::Get(GetRequest {
            instance,
            path,
            root: params.root.unwrap_or(Root::Relative),
            format: params.format.unwrap_or(Format::Nested),
            request_id: id,
        }),
        Method::Set => DomainMessage::Set(SetRequest {
            instance,
            path,
            data: params.data,
            metadata: params.metadata,
            request_id: id,
        }),
        Method::Subscribe => DomainMessage::Subscribe(SubscribeRequest {
            instance,
            path,
            root: params.root.unwrap_or(Root::Absolute),
            format: params.format.unwrap_or(Format::Nested),
            request_id: id,
        }),
        Method::Unsubscribe => DomainMessage::Unsubscribe(UnsubscribeRequest {
            instance,
            path,
            request_id: id,
        }),
        Method::TimeseriesGet => {
            let query = params.query.unwrap_or_default();
            DomainMessage::TimeseriesGet(TimeseriesGetRequest {
                instance,
                path,
                range: TimeRange::inclusive(query.gte, query.lte),
                request_id: id,
            })
        }
        Method::PermissionsEdit => DomainMessage::PermissionsEdit(PermissionsEditRequest {
            instance,
            path,
            user_id: params.user_id.unwrap_or_default(),
            allow: params.allow,
            deny: params.deny,
            delete: params.delete,
            request_id: id,
        }),
    };
    Ok(message)
}

/// Serialize a response into its JSON-RPC envelope
pub fn encode(message: &ResponseMessage) -> serde_json::Result<String> {
    match message {
        ResponseMessage::Data {
            instance,
            data,
            metadata,
            request_id,
        } => serde_json::to_string(&DataResponseDto {
            jsonrpc: JSONRPC_VERSION,
            id: request_id.as_ref(),
            result: DataResultDto {
                instance,
                data,
                metadata: metadata.as_ref(),
            },
        }),
        ResponseMessage::Status { request_id, .. } => serde_json::to_string(&OkResponseDto {
            jsonrpc: JSONRPC_VERSION,
            id: request_id.as_ref(),
            result: EmptyResult {},
        }),
        ResponseMessage::Error {
            code,
            message,
            reason,
            request_id,
        } => serde_json::to_string(&ErrorResponseDto {
            jsonrpc: JSONRPC_VERSION,
            id: request_id.as_ref(),
            error: ErrorBodyDto {
                code: *code,
                message,
                data: ErrorDataDto { reason },
            },
        }),
    }
}
