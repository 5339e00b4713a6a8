//! Per-method params rules
//!
//! Each method declares its required and allowed `params` fields. Checks
//! collect every violation instead of stopping at the first one.

use serde_json::{Map, Value};

/// Field kinds that need more than a presence check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// Any JSON value
    Any,
    /// String that is not empty or whitespace only
    NonBlank,
    String,
    Object,
    Boolean,
    StringArray,
    Enum(&'static [&'static str]),
    /// `{gte?, lte?}` with `{seconds, nanos}` bounds
    TimeQuery,
}

struct Field {
    name: &'static str,
    kind: Kind,
    required: bool,
}

const fn req(name: &'static str, kind: Kind) -> Field {
    Field {
        name,
        kind,
        required: true,
    }
}

const fn opt(name: &'static str, kind: Kind) -> Field {
    Field {
        name,
        kind,
        required: false,
    }
}

const FORMATS: &[&str] = &["nested", "flat"];
const ROOTS: &[&str] = &["absolute", "relative"];
const SYNC_MODES: &[&str] = &["off", "local", "remote"];

const GET: &[Field] = &[
    req("instance", Kind::NonBlank),
    req("schema", Kind::NonBlank),
    opt("path", Kind::String),
    opt("format", Kind::Enum(FORMATS)),
    opt("root", Kind::Enum(ROOTS)),
];

const SET: &[Field] = &[
    req("instance", Kind::NonBlank),
    req("schema", Kind::NonBlank),
    req("data", Kind::Any),
    opt("path", Kind::String),
    opt("metadata", Kind::Object),
    // Accepted for client compatibility, no store acts on them
    opt("sync", Kind::Enum(SYNC_MODES)),
    opt("timeseries", Kind::Boolean),
];

const SUBSCRIBE: &[Field] = GET;

const UNSUBSCRIBE: &[Field] = &[
    req("instance", Kind::NonBlank),
    req("schema", Kind::NonBlank),
    opt("path", Kind::String),
];

const TIMESERIES_GET: &[Field] = &[
    req("instance", Kind::NonBlank),
    req("schema", Kind::NonBlank),
    opt("path", Kind::String),
    opt("query", Kind::TimeQuery),
];

const PERMISSIONS_EDIT: &[Field] = &[
    req("userId", Kind::String),
    opt("instance", Kind::NonBlank),
    opt("schema", Kind::NonBlank),
    opt("path", Kind::String),
    opt("allow", Kind::StringArray),
    opt("deny", Kind::StringArray),
    opt("delete", Kind::StringArray),
];

/// Known wire methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Set,
    Subscribe,
    Unsubscribe,
    TimeseriesGet,
    PermissionsEdit,
}

impl Method {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "get" => Some(Method::Get),
            "set" => Some(Method::Set),
            "subscribe" => Some(Method::Subscribe),
            "unsubscribe" => Some(Method::Unsubscribe),
            "timeseries/get" => Some(Method::TimeseriesGet),
            "permissions/edit" => Some(Method::PermissionsEdit),
            _ => None,
        }
    }

    fn fields(self) -> &'static [Field] {
        match self {
            Method::Get => GET,
            Method::Set => SET,
            Method::Subscribe => SUBSCRIBE,
            Method::Unsubscribe => UNSUBSCRIBE,
            Method::TimeseriesGet => TIMESERIES_GET,
            Method::PermissionsEdit => PERMISSIONS_EDIT,
        }
    }
}

/// Validate `params` against the rules of `method`
pub fn check_params(method: Method, params: &Map<String, Value>) -> Vec<String> {
    let fields = method.fields();
    let mut errors = Vec::new();

    for field in fields {
        match params.get(field.name) {
            None if field.required => {
                errors.push(format!("The '{}' field is required", field.name));
            }
            None => {}
            Some(value) => {
                if let Some(err) = check_kind(field.name, field.kind, value) {
                    errors.push(err);
                }
            }
        }
    }

    for key in params.keys() {
        if !fields.iter().any(|f| f.name == key.as_str()) {
            errors.push(format!("Unexpected property found: '{}'", key));
        }
    }

    errors
}

fn check_kind(name: &str, kind: Kind, value: &Value) -> Option<String> {
    match kind {
        Kind::Any => None,
        Kind::NonBlank => match value.as_str() {
            Some(s) if !s.trim().is_empty() => None,
            Some(_) => Some(format!(
                "The '{}' field must contain at least one non-whitespace character",
                name
            )),
            None => Some(format!("The '{}' field must be a string", name)),
        },
        Kind::String => {
            (!value.is_string()).then(|| format!("The '{}' field must be a string", name))
        }
        Kind::Object => {
            (!value.is_object()).then(|| format!("The '{}' field must be an object", name))
        }
        Kind::Boolean => {
            (!value.is_boolean()).then(|| format!("The '{}' field must be a boolean", name))
        }
        Kind::StringArray => {
            let ok = value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string));
            (!ok).then(|| format!("The '{}' field must be an array of strings", name))
        }
        Kind::Enum(allowed) => match value.as_str() {
            Some(s) if allowed.contains(&s) => None,
            _ => Some(format!(
                "The '{}' field must be one of: {}",
                name,
                allowed.join(", ")
            )),
        },
        Kind::TimeQuery => check_time_query(name, value),
    }
}

fn check_time_query(name: &str, value: &Value) -> Option<String> {
    let Some(query) = value.as_object() else {
        return (!value.is_null()).then(|| format!("The '{}' field must be an object", name));
    };

    let mut problems = Vec::new();
    for (key, bound) in query {
        if key.as_str() != "gte" && key.as_str() != "lte" {
            problems.push(format!("Unexpected property found: '{}.{}'", name, key));
            continue;
        }
        let valid = bound.as_object().is_some_and(|b| {
            b.len() == 2
                && b.get("seconds").is_some_and(Value::is_i64)
                && b.get("nanos")
                    .and_then(Value::as_u64)
                    .is_some_and(|n| n < 1_000_000_000)
        });
        if !valid {
            problems.push(format!(
                "The '{}.{}' field must be {{seconds, nanos}}",
                name, key
            ));
        }
    }

    if problems.is_empty() {
        None
    } else {
        Some(problems.join("; "))
    }
}
