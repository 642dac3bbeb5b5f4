//! Canonical module keys.
//!
//! Absolute keys (a leading `/` or a `scheme://` prefix) pass through
//! unchanged. Relative keys are joined to the configured base and their
//! `.`/`..` segments resolved, so `./a/../b.json` and `b.json` share one
//! cache entry.

/// Returns true for keys that are used as-is.
pub fn is_absolute(key: &str) -> bool {
    key.starts_with('/')
        || key.split_once("://").is_some_and(|(scheme, _)| {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        })
}

/// Resolves `key` against `base`.
pub fn canonicalize(key: &str, base: &str) -> String {
    let key = key.trim();
    if is_absolute(key) {
        return key.to_string();
    }

    let (origin, base_path) = split_origin(base);
    let rooted = !origin.is_empty() || base_path.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in base_path.split('/').chain(key.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let path = segments.join("/");
    if rooted {
        format!("{}/{}", origin, path)
    } else {
        path
    }
}

/// Splits `scheme://authority` from the path of a URL-like base.
fn split_origin(base: &str) -> (&str, &str) {
    match base.find("://") {
        Some(i) => {
            let after = i + 3;
            match base[after..].find('/') {
                Some(j) => base.split_at(after + j),
                None => (base, ""),
            }
        }
        None => ("", base),
    }
}
