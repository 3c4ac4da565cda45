//! Stable hashing for ring placement.
//!
//! Ring keys and endpoint keys share one keyspace: lowercase hex SHA-256
//! digests. Lexicographic order over equal-length hex strings is the ring
//! order.

use sha2::{Digest, Sha256};

/// Hash an arbitrary string onto the ring.
pub fn sha_hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Generate a fresh random ring token.
pub fn random_key() -> String {
    sha_hash(&uuid::Uuid::new_v4().to_string())
}
