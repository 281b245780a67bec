//! Glob match of a namespace name against patterns with an optional leading
//! and/or trailing `*`. Interior `*` is literal; only one leading and one
//! trailing wildcard are recognized.

/// Returns true if `pattern` matches `candidate`.
///
/// - No `*` in `pattern`: exact match.
/// - Leading `*`: `candidate` must end with the suffix after the `*`.
/// - Trailing `*`: `candidate` must start with the prefix before the `*`.
/// - Both: the middle segment must appear anywhere in `candidate`.
pub fn matches(pattern: &str, candidate: &str) -> bool {
    let starts = pattern.starts_with('*');
    let ends = pattern.ends_with('*');

    match (starts, ends) {
        (false, false) => pattern == candidate,
        (true, false) => {
            let suffix = &pattern[1..];
            candidate.ends_with(suffix)
        }
        (false, true) => {
            let prefix = &pattern[..pattern.len() - 1];
            candidate.starts_with(prefix)
        }
        (true, true) => {
            if pattern.len() < 2 {
                // pattern is just "*"
                return true;
            }
            let middle = &pattern[1..pattern.len() - 1];
            middle.is_empty() || candidate.contains(middle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_no_wildcard() {
        assert!(matches("kube-system", "kube-system"));
    }

    #[test]
    fn bare_literal_never_matches_as_glob() {
        assert!(!matches("kube-", "kube-system"));
        assert!(!matches("-", "a-b"));
    }

    #[test]
    fn trailing_star_prefix_match() {
        assert!(matches("kube-*", "kube-system"));
        assert!(!matches("kube-*", "system-kube"));
    }

    #[test]
    fn leading_star_suffix_match() {
        assert!(matches("*-system", "kube-system"));
        assert!(!matches("*-system", "system-kube"));
    }

    #[test]
    fn both_ends_star_substring_match() {
        assert!(matches("*-kube-*", "a-kube-b"));
        assert!(!matches("*-kube-*", "my-controller"));
    }

    #[test]
    fn bare_star_matches_everything() {
        assert!(matches("*", "anything"));
        assert!(matches("*", ""));
    }

    #[test]
    fn interior_star_is_literal() {
        // A pattern with a `*` that is neither leading nor trailing is not
        // one of the two recognized wildcard positions; with our starts/ends
        // classification "a*b" has no leading/trailing star so it is an
        // exact-match pattern containing a literal asterisk.
        assert!(!matches("a*b", "aXb"));
        assert!(matches("a*b", "a*b"));
    }
}
