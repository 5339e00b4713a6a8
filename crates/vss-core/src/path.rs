//! Path key helpers.
//!
//! Datapoints travel in two spellings. The dotted form
//! (`Vehicle.CurrentLocation.Latitude`) is what clients send and receive;
//! the underscore-joined form (`Vehicle_CurrentLocation_Latitude`) is the
//! canonical key used for catalog lookups and storage. Segment names never
//! contain either separator, so the two forms translate losslessly.

/// Separator of the wire/display form
pub const DOT: char = '.';

/// Separator of the canonical key form
pub const UNDERSCORE: char = '_';

/// Convert a dotted path into its canonical underscore-joined key.
///
/// ```
/// # use vss_core::path::to_key;
/// assert_eq!(to_key("Vehicle.CurrentLocation.Latitude"), "Vehicle_CurrentLocation_Latitude");
/// ```
pub fn to_key(dotted: &str) -> String {
    dotted.replace(DOT, "_")
}

/// Convert a canonical key back into its dotted form.
///
/// ```
/// # use vss_core::path::to_dotted;
/// assert_eq!(to_dotted("Vehicle_Speed"), "Vehicle.Speed");
/// ```
pub fn to_dotted(key: &str) -> String {
    key.replace(UNDERSCORE, ".")
}

/// Merge a schema root and an optional sub-path into one canonical key.
///
/// An absent or empty path yields the schema on its own.
///
/// ```
/// # use vss_core::path::canonical_path;
/// assert_eq!(canonical_path("Vehicle", Some("CurrentLocation.Latitude")), "Vehicle_CurrentLocation_Latitude");
/// assert_eq!(canonical_path("Vehicle", None), "Vehicle");
/// ```
pub fn canonical_path(schema: &str, path: Option<&str>) -> String {
    match path {
        Some(p) if !p.is_empty() => to_key(&format!("{}{}{}", schema, DOT, p)),
        _ => to_key(schema),
    }
}

/// Join a parent path and a child segment in dotted form.
pub fn join_dotted(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else if child.is_empty() {
        parent.to_string()
    } else {
        format!("{}{}{}", parent, DOT, child)
    }
}

/// Render a list of canonical keys the way error messages show them.
pub fn display_list(keys: &[String]) -> String {
    keys.iter()
        .map(|k| to_dotted(k))
        .collect::<Vec<_>>()
        .join(", ")
}

/// True when a segment name could be translated between both forms
/// without ambiguity.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains(DOT) && !segment.contains(UNDERSCORE)
}
