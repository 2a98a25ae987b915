use super::HASH_SIZE;
use crate::ingestion::Record;

/// One member's local partition of the hash space.
///
/// A fixed array of [`HASH_SIZE`] buckets, each holding the records whose key
/// hashes to that index. Insertion is a plain append: storing an identical
/// record twice keeps both copies.
#[derive(Debug)]
pub struct Shard {
    buckets: Vec<Vec<Record>>,
}

impl Shard {
    pub fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); HASH_SIZE],
        }
    }

    pub fn insert(&mut self, bucket: usize, record: Record) {
        self.buckets[bucket].push(record);
    }

    /// Exact-key lookup within one bucket.
    pub fn lookup(&self, bucket: usize, key: &str) -> Option<&Record> {
        self.buckets[bucket].iter().find(|record| record.key == key)
    }

    pub fn bucket_len(&self, bucket: usize) -> usize {
        self.buckets[bucket].len()
    }

    pub fn record_count(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Every stored record with its bucket index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Record)> {
        self.buckets
            .iter()
            .enumerate()
            .flat_map(|(index, bucket)| bucket.iter().map(move |record| (index, record)))
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }
}

impl Default for Shard {
    fn default() -> Self {
        Self::new()
    }
}
