//! # Routing-Key Matching
//!
//! | Kind | Rule |
//! |------|------|
//! | `direct` | binding pattern equals the routing key |
//! | `topic` | dot-delimited; `*` matches exactly one segment, `#` zero or more |
//! | `fanout` | routing key ignored |

use shared_types::ExchangeKind;

/// Whether a message with `routing_key` is delivered through a binding with
/// `pattern` on an exchange of `kind`.
#[must_use]
pub fn matches(kind: ExchangeKind, pattern: &str, routing_key: &str) -> bool {
    match kind {
        ExchangeKind::Direct => pattern == routing_key,
        ExchangeKind::Fanout => true,
        ExchangeKind::Topic => topic_matches(pattern, routing_key),
    }
}

/// Topic-exchange pattern match.
#[must_use]
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_segments(&pattern, &key)
}

fn match_segments(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            // Collapse runs of `#`, they are equivalent to a single one.
            if rest.first() == Some(&"#") {
                return match_segments(rest, key);
            }
            (0..=key.len()).any(|skip| match_segments(rest, &key[skip..]))
        }
        Some((&"*", rest)) => !key.is_empty() && match_segments(rest, &key[1..]),
        Some((segment, rest)) => key.first() == Some(segment) && match_segments(rest, &key[1..]),
    }
}
