//! Defensive structural search over loosely-typed JSON payloads.
//!
//! Remote job services nest the same concept under different wrappers
//! (`data`, `Response`, ...) and spell it differently (`status`, `Status`,
//! `JobStatus`). These helpers search breadth-first so the shallowest match
//! wins, and at a single object the alias listed first wins.

use serde_json::Value;
use std::collections::VecDeque;

/// Find the shallowest value stored under any of `aliases`.
pub fn find_key<'a>(value: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    find_key_where(value, aliases, |_| true)
}

/// Like [`find_key`], but only accepts values for which `accept` holds.
/// Rejected matches do not stop the search.
pub fn find_key_where<'a, F>(value: &'a Value, aliases: &[&str], accept: F) -> Option<&'a Value>
where
    F: Fn(&Value) -> bool,
{
    let mut queue: VecDeque<&Value> = VecDeque::new();
    queue.push_back(value);

    while let Some(current) = queue.pop_front() {
        match current {
            Value::Object(map) => {
                for alias in aliases {
                    if let Some(found) = map.get(*alias) {
                        if accept(found) {
                            return Some(found);
                        }
                    }
                }
                queue.extend(map.values());
            }
            Value::Array(items) => queue.extend(items.iter()),
            _ => {}
        }
    }

    None
}

/// Find the shallowest scalar under `aliases` and render it as a string.
/// Numbers are accepted since some services return numeric job ids.
pub fn find_string(value: &Value, aliases: &[&str]) -> Option<String> {
    find_key_where(value, aliases, is_scalar_text).and_then(scalar_to_string)
}

/// Read one of `aliases` from this object only, without descending.
pub fn get_string(value: &Value, aliases: &[&str]) -> Option<String> {
    let map = value.as_object()?;
    aliases
        .iter()
        .filter_map(|alias| map.get(*alias))
        .find(|found| is_scalar_text(found))
        .and_then(scalar_to_string)
}

fn is_scalar_text(value: &Value) -> bool {
    match value {
        Value::String(s) => !s.trim().is_empty(),
        Value::Number(_) => true,
        _ => false,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_top_level_match() {
        let payload = json!({"status": "running"});
        assert_eq!(find_key(&payload, &["status"]), Some(&json!("running")));
    }

    #[test]
    fn test_nested_match() {
        let payload = json!({"code": 0, "data": {"task": {"status": "success"}}});
        assert_eq!(find_string(&payload, &["status"]).as_deref(), Some("success"));
    }

    #[test]
    fn test_shallowest_match_wins() {
        let payload = json!({
            "data": {"inner": {"Status": "DEEP"}},
            "Response": {"Status": "SHALLOW"}
        });
        assert_eq!(find_string(&payload, &["Status"]).as_deref(), Some("SHALLOW"));
    }

    #[test]
    fn test_alias_order_at_same_object() {
        let payload = json!({"State": "B", "JobStatus": "A"});
        assert_eq!(
            find_string(&payload, &["JobStatus", "State"]).as_deref(),
            Some("A")
        );
    }

    #[test]
    fn test_searches_through_arrays() {
        let payload = json!({"items": [{"other": 1}, {"task_id": "abc"}]});
        assert_eq!(find_string(&payload, &["task_id"]).as_deref(), Some("abc"));
    }

    #[test]
    fn test_numeric_ids_and_blank_strings() {
        let payload = json!({"id": "  ", "data": {"id": 42}});
        assert_eq!(find_string(&payload, &["id"]).as_deref(), Some("42"));
    }

    #[test]
    fn test_get_string_does_not_descend() {
        let payload = json!({"data": {"url": "https://x/a.glb"}});
        assert_eq!(get_string(&payload, &["url"]), None);
        assert_eq!(
            get_string(&payload["data"], &["Url", "url"]).as_deref(),
            Some("https://x/a.glb")
        );
    }

    #[test]
    fn test_missing_key() {
        assert_eq!(find_key(&json!([1, 2, "x"]), &["status"]), None);
    }
}
