//! Routing & Placement Module
//!
//! The deterministic key -> bucket -> owner mapping shared by every ring
//! member. A record's bucket is the sum of its key's character codes modulo
//! the fixed hash-space size; the bucket's owner is `bucket mod n`. The hash
//! is intentionally not collision-resistant: two keys may share a bucket, and
//! the shard resolves that with a linear scan.

pub mod shard;


pub use shard::Shard;

/// Fixed size of the hash space every shard partitions.
pub const HASH_SIZE: usize = 353;

/// Bucket index for a record key: sum of character codes mod [`HASH_SIZE`].
pub fn bucket_index(key: &str) -> usize {
    let sum: usize = key.chars().map(|letter| letter as usize).sum();
    sum % HASH_SIZE
}

/// Ring position that owns a bucket in a ring of `ring_size` members.
pub fn owner_id(bucket: usize, ring_size: usize) -> usize {
    bucket % ring_size
}

/// Where a record lands relative to one member's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// This member owns the record's bucket.
    Local { bucket: usize },
    /// Some other position owns it; forward one hop toward the successor.
    Forward { owner: usize },
}

/// Decide whether the member at `self_id` stores a record or forwards it.
pub fn place(key: &str, ring_size: usize, self_id: usize) -> Placement {
    let bucket = bucket_index(key);
    let owner = owner_id(bucket, ring_size);
    if owner == self_id {
        Placement::Local { bucket }
    } else {
        Placement::Forward { owner }
    }
}
