use subtle::ConstantTimeEq;

/// Header carrying the admin API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Constant-time string comparison to prevent timing attacks
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Check a provided admin key against the configured one.
/// Without a configured key every request is refused.
pub fn authorize_api_key(expected: Option<&str>, provided: Option<&str>) -> bool {
    match (expected, provided) {
        (Some(expected), Some(provided)) => constant_time_compare(expected, provided),
        _ => false,
    }
}
