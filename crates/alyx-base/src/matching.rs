//! Wildcard (type, source, action) matching shared by the event bus (which
//! computes the four dispatch keys for a published event) and the hook
//! dispatcher (which matches subscriber patterns against an event).

pub const WILDCARD: &str = "*";

/// The four bus dispatch keys for an event with (type, source, action):
/// `(T,s,a)`, `(T,*,a)`, `(T,s,*)`, `(T,*,*)`. Order matches the exact-then-
/// widening precedence used when the bus builds its handler set.
pub fn dispatch_keys(event_type: &str, source: &str, action: &str) -> [(String, String, String); 4] {
    [
        (event_type.to_string(), source.to_string(), action.to_string()),
        (event_type.to_string(), WILDCARD.to_string(), action.to_string()),
        (event_type.to_string(), source.to_string(), WILDCARD.to_string()),
        (event_type.to_string(), WILDCARD.to_string(), WILDCARD.to_string()),
    ]
}

/// Whether a subscriber pattern `(pattern_type, pattern_source,
/// pattern_action)` matches an event `(event_type, source, action)`, per the
/// matching-correctness invariant: type matches exactly, source/action match
/// exactly or via the wildcard `"*"`.
pub fn pattern_matches(
    pattern_type: &str,
    pattern_source: &str,
    pattern_action: &str,
    event_type: &str,
    source: &str,
    action: &str,
) -> bool {
    pattern_type == event_type
        && (pattern_source == WILDCARD || pattern_source == source)
        && (pattern_action == WILDCARD || pattern_action == action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_keys_cover_exact_and_three_wildcards() {
        let keys = dispatch_keys("http", "users", "create");
        assert_eq!(
            keys,
            [
                ("http".into(), "users".into(), "create".into()),
                ("http".into(), "*".into(), "create".into()),
                ("http".into(), "users".into(), "*".into()),
                ("http".into(), "*".into(), "*".into()),
            ]
        );
    }

    #[test]
    fn pattern_matching_respects_wildcards_and_type_exactness() {
        assert!(pattern_matches("http", "*", "create", "http", "posts", "create"));
        assert!(!pattern_matches("http", "*", "create", "http", "posts", "delete"));
        assert!(!pattern_matches("http", "*", "create", "webhook", "posts", "create"));
        assert!(pattern_matches("http", "users", "*", "http", "users", "update"));
    }
}
