//! Pod-scoped high-availability status merging.
//!
//! For an arbitrary semi-structured object, reads/writes `status.byPod`, a
//! sequence of mappings each carrying a required string `id`. Stateless: the
//! caller owns the object, this module only computes the new value.

use crate::error::HaError;

/// Read `POD_NAME` from the environment. Called once per operation — no
/// caching, so a process whose identity changes mid-run (not expected in
/// practice, but not precluded) is always reflected.
pub fn pod_identity() -> String {
    std::env::var("POD_NAME").unwrap_or_default()
}

fn by_pod_array(status: &serde_json::Value) -> Vec<serde_json::Value> {
    status
        .get("byPod")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

fn entry_id(entry: &serde_json::Value) -> Option<&str> {
    entry.get("id").and_then(|v| v.as_str())
}

/// Return the entry matching `identity`, or a fresh `{id: identity}` blank
/// if none exists. Malformed entries (missing/non-string `id`) are skipped
/// silently while searching.
pub fn get(status: &serde_json::Value, identity: &str) -> serde_json::Value {
    let entries = by_pod_array(status);
    entries
        .into_iter()
        .find(|e| entry_id(e) == Some(identity))
        .unwrap_or_else(|| serde_json::json!({ "id": identity }))
}

/// Overwrite the entry matching `identity` with `value` (with `id` forced to
/// `identity`), or append it if no entry matches. Never removes or
/// overwrites entries belonging to other identities. Malformed entries are
/// skipped silently while searching for the match, and are left untouched.
pub fn set(status: &mut serde_json::Value, identity: &str, mut value: serde_json::Value) {
    if let Some(obj) = value.as_object_mut() {
        obj.insert("id".to_string(), serde_json::Value::String(identity.to_string()));
    } else {
        value = serde_json::json!({ "id": identity });
    }

    let mut entries = by_pod_array(status);
    if let Some(slot) = entries.iter_mut().find(|e| entry_id(e) == Some(identity)) {
        *slot = value;
    } else {
        entries.push(value);
    }

    set_by_pod_array(status, entries);
}

/// Remove the entry matching `identity`, preserving the order of the
/// others. Fails with [`HaError::MalformedEntry`] and leaves the slice
/// unchanged if any entry is malformed (missing or non-string `id`) —
/// unlike `get`/`set`, `delete` must account for every entry to guarantee
/// it is removing the right (and only the right) one.
pub fn delete(status: &mut serde_json::Value, identity: &str) -> Result<(), HaError> {
    let entries = by_pod_array(status);
    for (i, entry) in entries.iter().enumerate() {
        if entry_id(entry).is_none() {
            return Err(HaError::MalformedEntry(i));
        }
    }

    let remaining: Vec<_> = entries
        .into_iter()
        .filter(|e| entry_id(e) != Some(identity))
        .collect();

    set_by_pod_array(status, remaining);
    Ok(())
}

fn set_by_pod_array(status: &mut serde_json::Value, entries: Vec<serde_json::Value>) {
    if !status.is_object() {
        *status = serde_json::json!({});
    }
    status["byPod"] = serde_json::Value::Array(entries);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_with(entries: serde_json::Value) -> serde_json::Value {
        serde_json::json!({ "byPod": entries })
    }

    #[test]
    fn get_returns_blank_when_absent() {
        let status = status_with(serde_json::json!([{"id": "p1", "v": "a"}]));
        let entry = get(&status, "p2");
        assert_eq!(entry, serde_json::json!({"id": "p2"}));
    }

    #[test]
    fn get_returns_matching_entry() {
        let status = status_with(serde_json::json!([{"id": "p1", "v": "a"}]));
        let entry = get(&status, "p1");
        assert_eq!(entry["v"], "a");
    }

    #[test]
    fn set_overwrites_matching_and_preserves_others() {
        let mut status = status_with(serde_json::json!([
            {"id": "p1", "v": "a"},
            {"id": "p2", "v": "b"}
        ]));
        set(&mut status, "p2", serde_json::json!({"v": "c"}));
        let arr = status["byPod"].as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0], serde_json::json!({"id": "p1", "v": "a"}));
        assert_eq!(arr[1], serde_json::json!({"id": "p2", "v": "c"}));
    }

    #[test]
    fn set_appends_when_absent() {
        let mut status = status_with(serde_json::json!([{"id": "p1", "v": "a"}]));
        set(&mut status, "p2", serde_json::json!({"v": "c"}));
        let arr = status["byPod"].as_array().unwrap();
        assert_eq!(arr.len(), 2);
    }

    #[test]
    fn delete_removes_matching_preserving_order() {
        let mut status = status_with(serde_json::json!([
            {"id": "p1", "v": "a"},
            {"id": "p2", "v": "c"}
        ]));
        delete(&mut status, "p1").unwrap();
        let arr = status["byPod"].as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["id"], "p2");
    }

    #[test]
    fn delete_fails_on_malformed_entry_and_leaves_slice_unchanged() {
        let mut status = status_with(serde_json::json!([
            {"id": "p1", "v": "a"},
            {"v": "no id here"}
        ]));
        let before = status.clone();
        let err = delete(&mut status, "p1").unwrap_err();
        assert_eq!(err, HaError::MalformedEntry(1));
        assert_eq!(status, before);
    }

    #[test]
    fn get_skips_malformed_entries_silently() {
        let status = status_with(serde_json::json!([
            {"v": "no id here"},
            {"id": "p1", "v": "a"}
        ]));
        let entry = get(&status, "p1");
        assert_eq!(entry["v"], "a");
    }

    #[test]
    fn set_then_delete_round_trip_preserves_other_entries() {
        let mut status = status_with(serde_json::json!([
            {"id": "P1", "v": "a"},
            {"id": "P2", "v": "b"}
        ]));
        set(&mut status, "P2", serde_json::json!({"v": "c"}));
        assert_eq!(
            status["byPod"],
            serde_json::json!([{"id": "P1", "v": "a"}, {"id": "P2", "v": "c"}])
        );
        delete(&mut status, "P1").unwrap();
        assert_eq!(status["byPod"], serde_json::json!([{"id": "P2", "v": "c"}]));
    }
}
