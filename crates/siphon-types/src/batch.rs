//! Batch framing between the accumulator and the persistence writers.

use crate::record::{DeliveryTag, Record};

/// A decoded record travelling through the work queue with its delivery tag.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub record: Record,
    pub tag: DeliveryTag,
}

/// A sealed batch bound for one persistence writer.
///
/// `records` and `tags` are parallel vectors: `tags[i]` is the delivery
/// identity of `records[i]`. The whole batch commits or fails as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub records: Vec<Record>,
    pub tags: Vec<DeliveryTag>,
    /// Index of the writer this batch was dispatched to.
    pub shard: usize,
}

impl Batch {
    pub fn with_capacity(capacity: usize, shard: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            tags: Vec::with_capacity(capacity),
            shard,
        }
    }

    pub fn push(&mut self, item: WorkItem) {
        self.records.push(item.record);
        self.tags.push(item.tag);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
