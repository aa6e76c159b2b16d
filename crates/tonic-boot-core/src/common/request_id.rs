//! Request identifier generation.
//!
//! Identifiers are ULIDs rendered in Crockford Base32: 26 characters,
//! lexicographically sortable by creation time, with 80 bits of randomness so
//! independently generated identifiers do not collide across hops.

use ferroid::id::ULID;

/// Generates a fresh, non-empty request identifier.
#[must_use]
pub fn generate_request_id() -> String {
    ULID::now().to_string()
}
