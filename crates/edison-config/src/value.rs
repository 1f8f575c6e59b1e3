//! Extraction helpers for reading typed fields out of merged YAML values.
//!
//! Domain views walk `serde_yaml::Value` trees by hand, the same way the
//! configuration is consumed everywhere else: missing keys fall back to
//! defaults, wrong-typed values are treated as absent.

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

pub(crate) fn field<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    map.get(key)
}

/// First present key wins; used for snake_case/camelCase aliases.
pub(crate) fn field_aliased<'a>(map: &'a Mapping, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| map.get(*key))
}

pub(crate) fn string_or(map: &Mapping, keys: &[&str], default: &str) -> String {
    field_aliased(map, keys)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| default.to_string())
}

pub(crate) fn opt_string(map: &Mapping, keys: &[&str]) -> Option<String> {
    field_aliased(map, keys)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

pub(crate) fn bool_or(map: &Mapping, keys: &[&str], default: bool) -> bool {
    field_aliased(map, keys)
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

pub(crate) fn u64_or(map: &Mapping, keys: &[&str], default: u64) -> u64 {
    field_aliased(map, keys)
        .and_then(Value::as_u64)
        .unwrap_or(default)
}

pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_sequence)
        .map(|seq| {
            seq.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(Value::Mapping(map)) = value {
        for (key, val) in map {
            if let (Some(key), Some(val)) = (key.as_str(), val.as_str()) {
                out.insert(key.to_string(), val.to_string());
            }
        }
    }
    out
}

pub(crate) fn string_list_map(value: Option<&Value>) -> BTreeMap<String, Vec<String>> {
    let mut out = BTreeMap::new();
    if let Some(Value::Mapping(map)) = value {
        for (key, val) in map {
            if let Some(key) = key.as_str() {
                out.insert(key.to_string(), string_list(Some(val)));
            }
        }
    }
    out
}
