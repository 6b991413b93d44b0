//! The per-segment delete log and visibility bitmap cache.

use std::num::NonZeroUsize;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::bitmap::RowBitmap;
use crate::segment::ack_responder::AckResponder;
use crate::segment::concurrent_vector::ConcurrentVector;
use crate::segment::insert_record::barrier;
use crate::Timestamp;

/// A cached visibility bitmap: which insert offsets are shadowed by the
/// first `del_barrier` deletes, over the insert domain `[0, insert_barrier)`.
#[derive(Debug, Clone)]
pub struct TmpBitmap {
    pub del_barrier: i64,
    pub insert_barrier: i64,
    pub deleted: RowBitmap,
}

impl TmpBitmap {
    pub fn empty(insert_barrier: i64) -> Self {
        Self {
            del_barrier: 0,
            insert_barrier,
            deleted: RowBitmap::empty(insert_barrier as u32),
        }
    }
}

/// Append-only record of deletes, shaped like the insert record minus the
/// typed columns, plus the LRU of computed visibility bitmaps.
pub struct DeletedRecord {
    pub reserved: AtomicI64,
    pub ack_responder: AckResponder,
    pub timestamps: ConcurrentVector<Timestamp>,
    pub uids: ConcurrentVector<i64>,
    cache: Mutex<LruCache<i64, Arc<TmpBitmap>>>,
}

impl DeletedRecord {
    pub fn new(size_per_chunk: usize, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            reserved: AtomicI64::new(0),
            ack_responder: AckResponder::new(),
            timestamps: ConcurrentVector::new(size_per_chunk),
            uids: ConcurrentVector::new(size_per_chunk),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Published delete count.
    pub fn ack(&self) -> i64 {
        self.ack_responder.ack()
    }

    /// Number of published deletes with timestamp strictly below `ts`.
    pub fn ts_barrier(&self, ts: Timestamp) -> i64 {
        barrier(&self.timestamps, self.ack(), ts)
    }

    /// Exact cache hit for `(del_barrier, insert_barrier)`. The lock is
    /// released before the caller computes anything with the entry.
    pub fn cache_get(&self, del_barrier: i64, insert_barrier: i64) -> Option<Arc<TmpBitmap>> {
        let mut cache = self.cache.lock();
        cache
            .get(&del_barrier)
            .filter(|entry| entry.insert_barrier == insert_barrier)
            .cloned()
    }

    /// The cached entry whose `del_barrier` is closest to the requested
    /// one, restricted to entries over the same insert domain (a bitmap
    /// built against a different insert barrier may have picked different
    /// target offsets, so it cannot seed a delta update).
    pub fn cache_nearest(&self, del_barrier: i64, insert_barrier: i64) -> Option<Arc<TmpBitmap>> {
        let cache = self.cache.lock();
        cache
            .iter()
            .filter(|(_, entry)| entry.insert_barrier == insert_barrier)
            .min_by_key(|(&key, _)| (key - del_barrier).abs())
            .map(|(_, entry)| Arc::clone(entry))
    }

    /// Install a freshly computed bitmap.
    pub fn cache_insert(&self, entry: Arc<TmpBitmap>) {
        let mut cache = self.cache.lock();
        cache.put(entry.del_barrier, entry);
    }
}
