//! Merge command implementation.

use mirror_protocol::{merge, Map, Value};
use std::path::Path;
use tracing::debug;

/// Runs the merge command.
pub fn run(tree_path: &Path, patch_path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut tree = load_map(tree_path)?;
    let patch = load_map(patch_path)?;
    debug!(tree_keys = tree.len(), patch_keys = patch.len(), "merging patch");

    merge(&mut tree, &patch);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&Value::Map(tree))?);
        }
        _ => {
            for line in flatten(&tree) {
                println!("{line}");
            }
        }
    }

    Ok(())
}

/// Reads a JSON object from `path`.
pub fn load_map(path: &Path) -> Result<Map, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read {}: {e}", path.display()))?;
    parse_map(&text).map_err(|e| format!("{}: {e}", path.display()).into())
}

fn parse_map(text: &str) -> Result<Map, String> {
    match serde_json::from_str::<Value>(text).map_err(|e| e.to_string())? {
        Value::Map(map) => Ok(map),
        _ => Err("expected a JSON object".to_string()),
    }
}

/// Renders a tree as one `path = value` line per leaf.
pub fn flatten(tree: &Map) -> Vec<String> {
    let mut lines = Vec::new();
    for (key, value) in tree {
        flatten_into(key, value, &mut lines);
    }
    lines
}

fn flatten_into(path: &str, value: &Value, lines: &mut Vec<String>) {
    match value {
        Value::Map(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten_into(&format!("{path}.{key}"), child, lines);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(&format!("{path}[{index}]"), child, lines);
            }
        }
        leaf => {
            let rendered = serde_json::Value::from(leaf.clone());
            lines.push(format!("{path} = {rendered}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_non_objects() {
        assert!(parse_map("[1, 2]").is_err());
        assert!(parse_map("not json").is_err());
        assert!(parse_map(r#"{"A": 1}"#).is_ok());
    }

    #[test]
    fn flatten_lists_leaves() {
        let tree = parse_map(r#"{"A": 1, "B": {"C": "x", "D": [true, {}]}, "E": []}"#).unwrap();
        assert_eq!(
            flatten(&tree),
            vec![
                "A = 1",
                "B.C = \"x\"",
                "B.D[0] = true",
                "B.D[1] = {}",
                "E = []",
            ]
        );
    }
}
