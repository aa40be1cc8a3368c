//! Host name pattern matching
//!
//! Overrides and the blocklist share one matcher. A pattern is either an
//! exact FQDN or a wildcard `*.<suffix>`; matching is case-insensitive and
//! ignores trailing dots on both sides.
//!
//! A wildcard requires at least one label before the suffix: `*.example.com`
//! matches `www.example.com` but never the bare `example.com`.

use std::collections::HashMap;

fn count_dots(s: &str) -> usize {
    s.bytes().filter(|&b| b == b'.').count()
}

/// Check whether `host` matches `pattern`.
///
/// # Example
///
/// ```
/// use sni_gateway::dns::matcher::matches;
///
/// assert!(matches("Example.COM.", "example.com"));
/// assert!(matches("www.example.com", "*.example.com"));
/// assert!(!matches("example.com", "*.example.com"));
/// ```
#[must_use]
pub fn matches(host: &str, pattern: &str) -> bool {
    let h = host.trim_end_matches('.').to_ascii_lowercase();
    let p = pattern.trim_end_matches('.').to_ascii_lowercase();

    if p.is_empty() {
        return false;
    }

    if let Some(rest) = p.strip_prefix('*') {
        if rest.starts_with('.') {
            // Suffix match including the leading dot, and at least as many
            // labels as the pattern — this excludes the bare parent.
            return h.ends_with(rest) && count_dots(&h) >= count_dots(&p);
        }
    }

    h == p
}

/// Find the value of the first pattern in `map` that accepts `host`.
///
/// Iteration order over the map is unspecified; callers must not rely on
/// ordering between conflicting patterns.
#[must_use]
pub fn find_value<'a>(map: &'a HashMap<String, String>, host: &str) -> Option<&'a str> {
    map.iter()
        .find(|(pattern, _)| matches(host, pattern))
        .map(|(_, value)| value.as_str())
}
