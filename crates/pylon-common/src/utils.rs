//! Utility functions for Pylon
//!
//! Common helper functions used across the codebase.

use std::sync::LazyLock;

/// Maximum identifier length accepted by the data plane
pub const MAX_RESOURCE_ID_LENGTH: usize = 64;

/// Number of md5 hex digits appended when an identifier is shortened
const ID_HASH_SUFFIX_LENGTH: usize = 8;

/// Regex pattern for validating registry key segments (gateway and stage names)
static KEY_SEGMENT_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new("^[a-zA-Z0-9_.-]+$").expect("Invalid regex pattern"));

/// Validate a string can be used as one segment of a registry key
///
/// Allowed characters: alphanumeric, underscore, dot, hyphen. Empty strings
/// and strings containing `/` are rejected.
///
/// # Examples
///
/// ```
/// use pylon_common::is_valid_key_segment;
///
/// assert!(is_valid_key_segment("my-gateway"));
/// assert!(is_valid_key_segment("prod_v2.1"));
/// assert!(!is_valid_key_segment("a/b"));
/// assert!(!is_valid_key_segment(""));
/// ```
pub fn is_valid_key_segment(segment: &str) -> bool {
    KEY_SEGMENT_PATTERN.is_match(segment)
}

/// Bound an identifier to `max_len` characters.
///
/// Identifiers within the limit are returned unchanged. Longer ones keep a
/// prefix and end with `-` plus the first 8 hex digits of the md5 of the
/// full identifier, so distinct long identifiers stay distinct and the
/// result is stable across runs.
///
/// # Examples
///
/// ```
/// use pylon_common::bounded_id;
///
/// assert_eq!(bounded_id("stage-1-backend-2", 64), "stage-1-backend-2");
/// let long = "x".repeat(100);
/// assert_eq!(bounded_id(&long, 64).len(), 64);
/// ```
pub fn bounded_id(id: &str, max_len: usize) -> String {
    if id.len() <= max_len {
        return id.to_string();
    }

    let digest = format!("{:x}", md5::compute(id.as_bytes()));
    let keep = max_len.saturating_sub(ID_HASH_SUFFIX_LENGTH + 1);

    // Identifiers are ASCII in practice, but never split a UTF-8 sequence.
    let mut cut = keep.min(id.len());
    while !id.is_char_boundary(cut) {
        cut -= 1;
    }

    format!("{}-{}", &id[..cut], &digest[..ID_HASH_SUFFIX_LENGTH])
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn current_timestamp_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
