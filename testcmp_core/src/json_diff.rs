use crate::report::{cat_not_too_many, section_header};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::fs;
use std::path::Path;
use testcmp_common::{Result, TestCmpError};

/// One entry of a symmetric JSON difference
#[derive(Debug, Clone, PartialEq)]
pub enum PathDiff {
    /// Value exists in both but differs
    Changed {
        path: String,
        old: JsonValue,
        new: JsonValue,
    },
    OldOnly { path: String, value: JsonValue },
    NewOnly { path: String, value: JsonValue },
}

/// Structural comparison of JSON documents, reported leaf by leaf
#[derive(Debug, Clone)]
pub struct JsonDiffEngine {
    limit: usize,
}

impl JsonDiffEngine {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn compare_files(&self, old: &Path, new: &Path, detail: &mut String) -> Result<usize> {
        let old_json = load(old)?;
        let new_json = load(new)?;

        let diffs = symmetric_diff(&old_json, &new_json);
        if diffs.is_empty() {
            return Ok(0);
        }

        let mut text = String::new();
        for diff in &diffs {
            match diff {
                PathDiff::Changed { path, old, new } => writeln!(text, "{}: {} -> {}", path, old, new)?,
                PathDiff::OldOnly { path, value } => writeln!(text, "{}: only in old: {}", path, value)?,
                PathDiff::NewOnly { path, value } => writeln!(text, "{}: only in new: {}", path, value)?,
            }
        }

        section_header(detail, "diff_json", old, new)?;
        cat_not_too_many(detail, &text, self.limit);
        Ok(1)
    }
}

fn load(path: &Path) -> Result<JsonValue> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| TestCmpError::format(path, e))
}

/// Leaf-level differences between two documents, in path order.
///
/// Values are compared exactly: `1` and `1.0` differ.
pub fn symmetric_diff(old: &JsonValue, new: &JsonValue) -> Vec<PathDiff> {
    let mut old_paths = BTreeMap::new();
    let mut new_paths = BTreeMap::new();

    // Flatten both JSON structures into path -> value maps
    flatten_json("root", old, &mut old_paths);
    flatten_json("root", new, &mut new_paths);

    let mut diffs = Vec::new();
    let mut new_iter = new_paths.into_iter().peekable();

    for (path, old_value) in old_paths {
        while let Some((new_path, _)) = new_iter.peek() {
            if *new_path >= path {
                break;
            }
            if let Some((path, value)) = new_iter.next() {
                diffs.push(PathDiff::NewOnly { path, value });
            }
        }

        match new_iter.next_if(|(new_path, _)| *new_path == path) {
            Some((_, new_value)) if new_value == old_value => {}
            Some((_, new_value)) => diffs.push(PathDiff::Changed {
                path,
                old: old_value,
                new: new_value,
            }),
            None => diffs.push(PathDiff::OldOnly { path, value: old_value }),
        }
    }

    diffs.extend(new_iter.map(|(path, value)| PathDiff::NewOnly { path, value }));
    diffs
}

/// Flatten a JSON value into a map of paths to leaf values.
///
/// Empty objects and arrays are leaves.
fn flatten_json(prefix: &str, value: &JsonValue, output: &mut BTreeMap<String, JsonValue>) {
    match value {
        JsonValue::Object(map) if !map.is_empty() => {
            for (key, val) in map {
                let path = format!("{}.{}", prefix, key);
                flatten_json(&path, val, output);
            }
        }
        JsonValue::Array(arr) if !arr.is_empty() => {
            for (i, val) in arr.iter().enumerate() {
                let path = format!("{}[{}]", prefix, i);
                flatten_json(&path, val, output);
            }
        }
        _ => {
            output.insert(prefix.to_string(), value.clone());
        }
    }
}
