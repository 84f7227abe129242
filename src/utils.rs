//! Utility functions for hashing and identifiers

use uuid7::uuid7;

// hash a fresh uuid7 together with the creator so ids from different
// organizations never collide
pub fn new_transaction_id(creator: &str) -> String {
    let mut seed = uuid7().as_bytes().to_vec();
    seed.extend_from_slice(creator.as_bytes());
    sha256::digest(&seed)
}

/// Fixed-width prefix under which every history record of `key` is stored.
pub fn history_prefix(key: &str) -> String {
    sha256::digest(key)
}
