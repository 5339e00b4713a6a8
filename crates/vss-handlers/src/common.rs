//! Get/set/timeseries logic shared by both handler variants

use serde_json::{json, Map, Value};
use tracing::debug;

use vss_core::path::{to_key, UNDERSCORE};
use vss_core::{
    format_response, DatapointStore, Format, GetRequest, HandlerError, HandlerResult, NamedValue,
    ResponseMessage, Root, SetRequest, TimeseriesGetRequest,
};

fn resolve<S: DatapointStore + ?Sized>(store: &S, path: &str) -> HandlerResult<Vec<String>> {
    let resolved = store.catalog().resolve(path);
    if resolved.is_empty() {
        return Err(HandlerError::UnknownPath(path.to_string()));
    }
    Ok(resolved)
}

fn child_key(path: &str, relative: &str) -> String {
    if relative.is_empty() {
        path.to_string()
    } else {
        format!("{}{}{}", path, UNDERSCORE, to_key(relative))
    }
}

/// Leaves of a set payload as canonical keys
fn leaves(path: &str, data: &Value) -> Vec<NamedValue> {
    fn walk(key: String, value: &Value, out: &mut Vec<NamedValue>) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    walk(child_key(&key, k), v, out);
                }
            }
            other => out.push(NamedValue::new(key, other.clone())),
        }
    }

    let mut out = Vec::new();
    walk(path.to_string(), data, &mut out);
    out
}

pub(crate) async fn get<S: DatapointStore + ?Sized>(
    store: &S,
    req: &GetRequest,
) -> HandlerResult<ResponseMessage> {
    let resolved = resolve(store, &req.path)?;
    let result = store.query_values(&req.instance, &resolved, None).await?;

    let formatted = format_response(&req.path, &result.values, &result.metadata, req.root, req.format)
        .ok_or_else(|| HandlerError::DataNotFound {
            instance: req.instance.clone(),
            datapoints: resolved.clone(),
        })?;

    Ok(ResponseMessage::Data {
        instance: req.instance.clone(),
        data: formatted.data,
        metadata: formatted.metadata,
        request_id: req.request_id.clone(),
    })
}

pub(crate) async fn set<S: DatapointStore + ?Sized>(
    store: &S,
    req: &SetRequest,
) -> HandlerResult<ResponseMessage> {
    let catalog = store.catalog();
    let mut values = leaves(&req.path, &req.data);

    let unknown: Vec<String> = values
        .iter()
        .filter(|v| !catalog.contains(&v.name) || v.name == catalog.id_field())
        .map(|v| v.name.clone())
        .collect();
    if !unknown.is_empty() {
        return Err(HandlerError::UnknownNode(unknown));
    }

    let metadata: Vec<NamedValue> = match &req.metadata {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(relative, value)| NamedValue::new(child_key(&req.path, relative), value.clone()))
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(_) => {
            return Err(HandlerError::InvalidRequest(
                "metadata must be an object".to_string(),
            ))
        }
    };

    values.push(NamedValue::new(
        catalog.id_field(),
        Value::String(req.instance.clone()),
    ));
    store.write_values(&req.instance, &values, &metadata).await?;
    debug!(instance = %req.instance, written = values.len() - 1, "Wrote datapoints");

    Ok(ResponseMessage::ok(
        format!("Successfully wrote data to '{}'", req.instance),
        req.request_id.clone(),
    ))
}

pub(crate) async fn timeseries_get<S: DatapointStore + ?Sized>(
    store: &S,
    req: &TimeseriesGetRequest,
) -> HandlerResult<ResponseMessage> {
    let resolved = resolve(store, &req.path)?;
    let series = store.query_series(&req.instance, &resolved, &req.range).await?;

    let values: Vec<NamedValue> = series
        .into_iter()
        .map(|s| {
            let samples = s
                .samples
                .into_iter()
                .map(|sample| {
                    let mut entry = Map::new();
                    entry.insert("ts".to_string(), json!(sample.ts));
                    entry.insert("value".to_string(), sample.value);
                    Value::Object(entry)
                })
                .collect();
            NamedValue::new(s.name, Value::Array(samples))
        })
        .collect();

    let formatted = format_response(&req.path, &values, &[], Root::Relative, Format::Nested)
        .ok_or_else(|| HandlerError::DataNotFound {
            instance: req.instance.clone(),
            datapoints: resolved.clone(),
        })?;

    Ok(ResponseMessage::Data {
        instance: req.instance.clone(),
        data: formatted.data,
        metadata: None,
        request_id: req.request_id.clone(),
    })
}
