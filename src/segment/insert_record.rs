//! The per-segment insert tuple: timestamps, primary keys, typed columns.

use std::sync::atomic::AtomicI64;

use crate::schema::{FieldOffset, Schema};
use crate::segment::ack_responder::AckResponder;
use crate::segment::column::ColumnData;
use crate::segment::concurrent_vector::ConcurrentVector;
use crate::Timestamp;

/// Append-only record of everything inserted into a growing segment.
///
/// `reserved` hands out slot ranges; `ack_responder` publishes the filled
/// prefix; `timestamps`, `uids` and one column per schema field hold the
/// row data, all indexed by slot offset.
pub struct InsertRecord {
    pub reserved: AtomicI64,
    pub ack_responder: AckResponder,
    pub timestamps: ConcurrentVector<Timestamp>,
    pub uids: ConcurrentVector<i64>,
    columns: Vec<ColumnData>,
}

impl InsertRecord {
    pub fn new(schema: &Schema, size_per_chunk: usize) -> Self {
        let columns = schema
            .fields()
            .iter()
            .map(|field| ColumnData::from_field(field, size_per_chunk))
            .collect();
        Self {
            reserved: AtomicI64::new(0),
            ack_responder: AckResponder::new(),
            timestamps: ConcurrentVector::new(size_per_chunk),
            uids: ConcurrentVector::new(size_per_chunk),
            columns,
        }
    }

    /// The typed column at a field offset.
    pub fn column(&self, offset: FieldOffset) -> &ColumnData {
        &self.columns[offset.0]
    }

    /// Published row count.
    pub fn ack(&self) -> i64 {
        self.ack_responder.ack()
    }

    /// Number of published rows with timestamp strictly below `ts`.
    pub fn ts_barrier(&self, ts: Timestamp) -> i64 {
        barrier(&self.timestamps, self.ack(), ts)
    }
}

/// Binary search for the count of published entries with timestamp `< ts`.
///
/// Correct because timestamps are monotone per segment: each batch is
/// sorted before publication and the surrounding system feeds batches in
/// timestamp order.
pub(crate) fn barrier(
    timestamps: &ConcurrentVector<Timestamp>,
    published: i64,
    ts: Timestamp,
) -> i64 {
    let mut lo = 0i64;
    let mut hi = published;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if timestamps.get(mid as usize) < ts {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}
