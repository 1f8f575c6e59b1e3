//! Deep merge for layered YAML configuration.
//!
//! Mappings merge key-by-key. Sequences merge by append-and-dedupe with order
//! preserved, except for paths listed in [`REPLACE_PATHS`] where the overlay
//! replaces the base wholesale. Scalars from the overlay always win.

use serde_yaml::{Mapping, Value};

/// Dotted paths whose list values replace instead of appending.
///
/// Wave order and post-install commands are positional recipes; appending a
/// project's list to the bundled one would corrupt them.
pub const REPLACE_PATHS: &[&str] = &[
    "qa.waves",
    "worktrees.postInstallCommands",
    "worktrees.sharedState.sharedPaths",
    "session.lookupOrder",
];

fn joined(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn merge_sequences(base: Vec<Value>, overlay: Vec<Value>) -> Vec<Value> {
    let mut out = base;
    for item in overlay {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn merge_at(base: Value, overlay: Value, path: &str) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let key_str = key.as_str().map(str::to_string).unwrap_or_default();
                let child_path = joined(path, &key_str);
                match base_map.remove(&key) {
                    Some(base_value) => {
                        base_map.insert(key, merge_at(base_value, overlay_value, &child_path));
                    }
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
            Value::Mapping(base_map)
        }
        (Value::Sequence(base_seq), Value::Sequence(overlay_seq)) => {
            if REPLACE_PATHS.contains(&path) {
                Value::Sequence(overlay_seq)
            } else {
                Value::Sequence(merge_sequences(base_seq, overlay_seq))
            }
        }
        // Overlay wins on type mismatch or scalar.
        (_, overlay_value) => overlay_value,
    }
}

/// Merge `overlay` onto `base` and return the combined value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    merge_at(base, overlay, "")
}

/// Look up a dotted path (`a.b.c`) inside a YAML value.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Mapping(map) => {
                current = map.get(Value::String(part.to_string()))?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Set a dotted path inside a YAML mapping, creating intermediate maps.
pub fn set_path(root: &mut Value, path: &str, new_value: Value) {
    if !matches!(root, Value::Mapping(_)) {
        *root = Value::Mapping(Mapping::new());
    }
    let mut current = root;
    let parts: Vec<&str> = path.split('.').collect();
    for (i, part) in parts.iter().enumerate() {
        let map = match current {
            Value::Mapping(map) => map,
            _ => unreachable!("intermediate nodes are forced to mappings"),
        };
        let key = Value::String(part.to_string());
        if i == parts.len() - 1 {
            map.insert(key, new_value);
            return;
        }
        if !matches!(map.get(&key), Some(Value::Mapping(_))) {
            map.insert(key.clone(), Value::Mapping(Mapping::new()));
        }
        current = map.get_mut(&key).expect("just inserted");
    }
}
