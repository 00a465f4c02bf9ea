//! Prefixed, time-ordered resource identifiers.
//!
//! Every stored resource gets an id of the form `<prefix>-<uuid-v7-simple>`,
//! e.g. `agt-0190f1f3c2ce7cc8a1b2c3d4e5f60718`. UUIDv7 encodes a millisecond
//! timestamp in its most significant bits, so ids of one kind sort in
//! creation order as plain strings.

use uuid::Uuid;

/// Generate a new resource id with the given kind prefix.
///
/// The prefix is expected to be a short lowercase tag (`agt`, `wfl`, …);
/// it is joined to a lowercase hex UUIDv7 with a single hyphen.
#[must_use]
pub fn new_prefixed_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::now_v7().simple())
}

/// Split an id into its kind prefix and body.
///
/// Returns `None` if the id has no hyphen or an empty prefix/body.
#[must_use]
pub fn split_id(id: &str) -> Option<(&str, &str)> {
    let (prefix, body) = id.split_once('-')?;
    if prefix.is_empty() || body.is_empty() {
        return None;
    }
    Some((prefix, body))
}
