//! Response formatter
//!
//! Reshapes resolved `(name, value)` pairs according to the client's
//! `root`/`format` choice. Names may arrive in dotted or canonical form.
//! Pure: nothing here touches handler or subscription state.

use serde_json::{Map, Value};

use crate::message::{Format, NamedValue, Root};
use crate::path::{to_dotted, DOT};

/// Result of formatting one data response
#[derive(Debug, Clone, PartialEq)]
pub struct Formatted {
    pub data: Value,
    /// Always flat; `None` when no metadata was supplied
    pub metadata: Option<Value>,
}

/// Format values and metadata for a data response.
///
/// `requested_path` is the path the client asked for, schema included,
/// in either spelling. Returns `None` when `values` is empty.
pub fn format_response(
    requested_path: &str,
    values: &[NamedValue],
    metadata: &[NamedValue],
    root: Root,
    format: Format,
) -> Option<Formatted> {
    let first = values.first()?;
    let first_name = to_dotted(&first.name);
    let schema = first_name.split(DOT).next().unwrap_or_default().to_string();
    let requested = normalize_requested(&to_dotted(requested_path), &schema);
    let shaper = KeyShaper {
        schema: &schema,
        requested: &requested,
        root,
    };

    let data = match format {
        Format::Flat => build_flat(&shaper, values),
        Format::Nested => build_nested(&shaper, values),
    };
    let metadata = if metadata.is_empty() {
        None
    } else {
        Some(build_flat(&shaper, metadata))
    };

    Some(Formatted { data, metadata })
}

/// Strip the schema from the requested path
fn normalize_requested(path: &str, schema: &str) -> String {
    if path.is_empty() || path == schema {
        return String::new();
    }
    path.strip_prefix(schema)
        .and_then(|rest| rest.strip_prefix(DOT))
        .unwrap_or(path)
        .to_string()
}

struct KeyShaper<'a> {
    schema: &'a str,
    requested: &'a str,
    root: Root,
}

impl KeyShaper<'_> {
    fn key(&self, name: &str) -> String {
        let name = to_dotted(name);
        match self.root {
            Root::Relative => {
                let full = if self.requested.is_empty() {
                    self.schema.to_string()
                } else {
                    format!("{}{}{}", self.schema, DOT, self.requested)
                };
                if let Some(rest) = strip_segment_prefix(&name, &full) {
                    rest.to_string()
                } else if name == full {
                    String::new()
                } else if let Some(rest) = strip_segment_prefix(&name, self.schema) {
                    rest.to_string()
                } else {
                    name
                }
            }
            Root::Absolute => match name.split_once(DOT) {
                Some((_, rest)) => rest.to_string(),
                None => name,
            },
        }
    }
}

/// `name` without `prefix.`, if it starts with it
fn strip_segment_prefix<'n>(name: &'n str, prefix: &str) -> Option<&'n str> {
    name.strip_prefix(prefix)?.strip_prefix(DOT)
}

fn build_flat(shaper: &KeyShaper<'_>, nodes: &[NamedValue]) -> Value {
    let mut out = Map::new();
    for node in nodes {
        out.insert(shaper.key(&node.name), node.value.clone());
    }
    Value::Object(out)
}

fn build_nested(shaper: &KeyShaper<'_>, nodes: &[NamedValue]) -> Value {
    let keyed: Vec<(String, &Value)> = nodes
        .iter()
        .map(|n| (shaper.key(&n.name), &n.value))
        .collect();

    // Exact leaf request: the value itself, not `{"": value}`
    if let [(key, value)] = keyed.as_slice() {
        if key.is_empty() {
            return (*value).clone();
        }
    }

    let mut root = Map::new();
    for (key, value) in keyed {
        if key.is_empty() {
            continue;
        }
        insert_nested(&mut root, &key, value.clone());
    }
    Value::Object(root)
}

fn insert_nested(tree: &mut Map<String, Value>, key: &str, value: Value) {
    match key.split_once(DOT) {
        None => {
            tree.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let child = tree
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_nested(map, rest, value);
            }
        }
    }
}

/// Flatten a nested object into dotted keys (leaves only)
pub fn flatten(value: &Value) -> Map<String, Value> {
    fn walk(prefix: &str, value: &Value, out: &mut Map<String, Value>) {
        match value {
            Value::Object(map) if !map.is_empty() => {
                for (k, v) in map {
                    let key = if prefix.is_empty() {
                        k.clone()
                    } else {
                        format!("{}{}{}", prefix, DOT, k)
                    };
                    walk(&key, v, out);
                }
            }
            other => {
                out.insert(prefix.to_string(), other.clone());
            }
        }
    }

    let mut out = Map::new();
    walk("", value, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn location() -> Vec<NamedValue> {
        vec![
            NamedValue::new("Vehicle_CurrentLocation_Latitude", json!(48.1)),
            NamedValue::new("Vehicle_CurrentLocation_Longitude", json!(11.5)),
        ]
    }

    #[test]
    fn relative_nested_strips_requested_prefix() {
        let out = format_response(
            "Vehicle_CurrentLocation",
            &location(),
            &[],
            Root::Relative,
            Format::Nested,
        )
        .unwrap();
        assert_eq!(out.data, json!({"Latitude": 48.1, "Longitude": 11.5}));
        assert_eq!(out.metadata, None);
    }

    #[test]
    fn relative_flat_strips_requested_prefix() {
        let out = format_response(
            "Vehicle.CurrentLocation",
            &location(),
            &[],
            Root::Relative,
            Format::Flat,
        )
        .unwrap();
        assert_eq!(out.data, json!({"Latitude": 48.1, "Longitude": 11.5}));
    }

    #[test]
    fn absolute_flat_keeps_path_below_schema() {
        let out = format_response(
            "Vehicle_CurrentLocation",
            &location(),
            &[],
            Root::Absolute,
            Format::Flat,
        )
        .unwrap();
        assert_eq!(
            out.data,
            json!({
                "CurrentLocation.Latitude": 48.1,
                "CurrentLocation.Longitude": 11.5
            })
        );
    }

    #[test]
    fn absolute_nested_builds_tree() {
        let out = format_response(
            "Vehicle",
            &location(),
            &[],
            Root::Absolute,
            Format::Nested,
        )
        .unwrap();
        assert_eq!(
            out.data,
            json!({"CurrentLocation": {"Latitude": 48.1, "Longitude": 11.5}})
        );
    }

    #[test]
    fn exact_leaf_relative_nested_is_bare_value() {
        let values = vec![NamedValue::new("Vehicle_Speed", json!(42))];
        let metadata = vec![NamedValue::new(
            "Vehicle_Speed",
            json!({"timestamps": {"received": {"seconds": 1, "nanos": 0}}}),
        )];
        let out = format_response(
            "Vehicle_Speed",
            &values,
            &metadata,
            Root::Relative,
            Format::Nested,
        )
        .unwrap();
        assert_eq!(out.data, json!(42));
        assert_eq!(
            out.metadata,
            Some(json!({"": {"timestamps": {"received": {"seconds": 1, "nanos": 0}}}}))
        );
    }

    #[test]
    fn exact_leaf_relative_flat_uses_empty_key() {
        let values = vec![NamedValue::new("Vehicle_Speed", json!(42))];
        let out =
            format_response("Vehicle.Speed", &values, &[], Root::Relative, Format::Flat).unwrap();
        assert_eq!(out.data, json!({"": 42}));
    }

    #[test]
    fn relative_without_path_strips_schema_only() {
        let values = vec![
            NamedValue::new("Vehicle_Speed", json!(42)),
            NamedValue::new("Vehicle_CurrentLocation_Latitude", json!(48.1)),
        ];
        let out = format_response("Vehicle", &values, &[], Root::Relative, Format::Nested).unwrap();
        assert_eq!(
            out.data,
            json!({"Speed": 42, "CurrentLocation": {"Latitude": 48.1}})
        );
    }

    #[test]
    fn sibling_with_shared_text_prefix_is_not_stripped() {
        // "Vehicle.Cabin" must not strip "Vehicle.CabinLight.On"
        let values = vec![
            NamedValue::new("Vehicle_Cabin_Temperature", json!(21)),
            NamedValue::new("Vehicle_CabinLight_On", json!(true)),
        ];
        let out = format_response("Vehicle_Cabin", &values, &[], Root::Relative, Format::Flat)
            .unwrap();
        assert_eq!(
            out.data,
            json!({"Temperature": 21, "CabinLight.On": true})
        );
    }

    #[test]
    fn metadata_is_always_flat() {
        let metadata = vec![NamedValue::new(
            "Vehicle_CurrentLocation_Latitude",
            json!({"source": "gps"}),
        )];
        let out = format_response(
            "Vehicle",
            &location(),
            &metadata,
            Root::Absolute,
            Format::Nested,
        )
        .unwrap();
        assert_eq!(
            out.metadata,
            Some(json!({"CurrentLocation.Latitude": {"source": "gps"}}))
        );
    }

    #[test]
    fn nested_and_flat_absolute_share_key_set() {
        let values = vec![
            NamedValue::new("Vehicle_Speed", json!(10)),
            NamedValue::new("Vehicle_CurrentLocation_Latitude", json!(1.0)),
            NamedValue::new("Vehicle_CurrentLocation_Longitude", json!(2.0)),
            NamedValue::new("Vehicle_Cabin_Door_Row1_IsOpen", json!(false)),
        ];
        let nested =
            format_response("Vehicle", &values, &[], Root::Absolute, Format::Nested).unwrap();
        let flat = format_response("Vehicle", &values, &[], Root::Absolute, Format::Flat).unwrap();

        let mut nested_keys: Vec<String> = flatten(&nested.data).keys().cloned().collect();
        let mut flat_keys: Vec<String> = match flat.data {
            Value::Object(map) => map.keys().cloned().collect(),
            other => panic!("flat output is not an object: {}", other),
        };
        nested_keys.sort();
        flat_keys.sort();
        assert_eq!(nested_keys, flat_keys);
    }

    #[test]
    fn empty_values_produce_nothing() {
        assert!(format_response("Vehicle", &[], &[], Root::Absolute, Format::Flat).is_none());
    }
}
