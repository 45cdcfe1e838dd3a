use crate::Pipeline::Structs::Frame_Structs::FrameMetadata;
use std::sync::atomic::{AtomicU32, Ordering};

// Use parking_lot's Mutex for better performance
use parking_lot::Mutex;

/// Handle to one record in a [`MetadataPool`]. Copyable; the reference count
/// lives in the pool, not in the handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MetadataRef(u32);

struct MetadataRecord {
    /// Outstanding references. Zero means the record is on the free list.
    refcount: AtomicU32,
    meta: Mutex<FrameMetadata>,
}

/// Fixed pool of reusable per-frame metadata records.
///
/// Metadata is exchanged frame-for-frame at line rate, so records are
/// allocated once at pool creation and recycled through a free list. The
/// total in-flight count is bounded by the number of non-empty frames across
/// all ring buffers, which sizes the pool (typically `10 × buffer_depth`).
pub struct MetadataPool {
    records: Box<[MetadataRecord]>,
    free: Mutex<Vec<u32>>,
}

impl MetadataPool {
    /// Allocate `count` zeroed records, all on the free list.
    pub fn create(count: usize) -> std::sync::Arc<Self> {
        let records = (0..count)
            .map(|_| MetadataRecord {
                refcount: AtomicU32::new(0),
                meta: Mutex::new(FrameMetadata::default()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        // Pop order matches record order for determinism in tests.
        let free = (0..count as u32).rev().collect();
        std::sync::Arc::new(Self {
            records,
            free: Mutex::new(free),
        })
    }

    /// Pop a free record with a reference count of one.
    ///
    /// Returns `None` when the pool is exhausted. An exhausted pool means the
    /// pool was sized too small for the stage graph; callers treat this as a
    /// fatal configuration error.
    pub fn acquire(&self) -> Option<MetadataRef> {
        let index = self.free.lock().pop()?;
        let record = &self.records[index as usize];
        let prev = record.refcount.swap(1, Ordering::AcqRel);
        debug_assert_eq!(prev, 0, "record acquired while still referenced");
        Some(MetadataRef(index))
    }

    /// Add one reference to an acquired record.
    pub fn retain(&self, r: MetadataRef) {
        let prev = self.records[r.0 as usize]
            .refcount
            .fetch_add(1, Ordering::AcqRel);
        assert!(prev > 0, "retain on a free metadata record");
    }

    /// Drop one reference; on zero the record is zeroed and returned to the
    /// free list.
    pub fn release(&self, r: MetadataRef) {
        let record = &self.records[r.0 as usize];
        let prev = record.refcount.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "release on a free metadata record");
        if prev == 1 {
            *record.meta.lock() = FrameMetadata::default();
            self.free.lock().push(r.0);
        }
    }

    /// Read the record out by value.
    pub fn get(&self, r: MetadataRef) -> FrameMetadata {
        *self.records[r.0 as usize].meta.lock()
    }

    /// Mutate the record in place. Producers stamp metadata through this
    /// before publishing the frame.
    pub fn update<R>(&self, r: MetadataRef, f: impl FnOnce(&mut FrameMetadata) -> R) -> R {
        f(&mut self.records[r.0 as usize].meta.lock())
    }

    /// Number of records currently held by frames or producers.
    pub fn outstanding(&self) -> usize {
        self.records.len() - self.free.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_cycles_free_list() {
        let pool = MetadataPool::create(2);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());
        assert_eq!(pool.outstanding(), 2);

        pool.update(a, |m| m.fpga_seq_num = 42);
        assert_eq!(pool.get(a).fpga_seq_num, 42);

        pool.release(b);
        pool.release(a);
        assert_eq!(pool.outstanding(), 0);

        // Released records come back zeroed.
        let c = pool.acquire().unwrap();
        assert_eq!(pool.get(c).fpga_seq_num, 0);
        pool.release(c);
    }

    #[test]
    fn retain_keeps_record_alive() {
        let pool = MetadataPool::create(1);
        let r = pool.acquire().unwrap();
        pool.retain(r);
        pool.release(r);
        assert_eq!(pool.outstanding(), 1);
        pool.release(r);
        assert_eq!(pool.outstanding(), 0);
    }
}
