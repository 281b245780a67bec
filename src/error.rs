//! Ambient error types.
//!
//! Most of this crate propagates `anyhow::Error` (orchestration boundaries)
//! or `kube::Error` (API-client calls) directly: `anyhow::Result` at the
//! top-level run loops, typed `kube::Error` inside reconcile-adjacent
//! helpers. The one error type that needs a concrete shape is
//! [`MergedError`]: the discovery enumerator (and anything else that must
//! accumulate independent per-item failures into one reportable error)
//! needs a deterministic merge rule — join with newlines, preserve count.

use std::fmt;

use thiserror::Error;

/// Several errors joined into one, line-separated. Used where a tick or a
/// pass must report "did anything fail" without losing the detail of each
/// independent failure.
#[derive(Debug, Error)]
pub struct MergedError {
    message: String,
    count: usize,
}

impl MergedError {
    /// Merge a list of errors into one. An empty list produces a
    /// zero-message error; a single error preserves its text unchanged.
    pub fn merge<E: fmt::Display>(errors: &[E]) -> MergedError {
        let message = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        MergedError {
            message,
            count: errors.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl fmt::Display for MergedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors surfaced by the HA status merger.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HaError {
    #[error("status.byPod entry at index {0} is malformed: missing or non-string `id`")]
    MalformedEntry(usize),
}

/// Errors surfaced by the process excluder's meta-accessor lookups.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessorError {
    #[error("object has no accessible name/namespace metadata")]
    MissingMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_empty_is_zero_message() {
        let e = MergedError::merge::<String>(&[]);
        assert_eq!(e.to_string(), "");
        assert!(e.is_empty());
    }

    #[test]
    fn merge_single_preserves_text() {
        let e = MergedError::merge(&["boom".to_string()]);
        assert_eq!(e.to_string(), "boom");
        assert_eq!(e.count(), 1);
    }

    #[test]
    fn merge_three_joins_with_newline() {
        let e = MergedError::merge(&["e1".to_string(), "e2".to_string(), "e3".to_string()]);
        assert_eq!(e.to_string(), "e1\ne2\ne3");
        assert_eq!(e.count(), 3);
    }
}
