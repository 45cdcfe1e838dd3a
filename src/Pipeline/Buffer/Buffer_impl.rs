use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use super::Buffer::{ConsumerId, FrameSlot, FrameStorage, RingBuffer, RingState};
use crate::Core::pool::{MetadataPool, MetadataRef};
use crate::Pipeline::Structs::Frame_Structs::{ErrorMatrix, FrameMetadata, PackedStreamId, Timeval};
use crossbeam_utils::CachePadded;
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::AtomicU64;

impl RingBuffer {
    /// Allocate a ring of `num_slots` frames of `slot_size` bytes each.
    ///
    /// All slots start empty and zeroed. The buffer is shared between one
    /// producer stage and any number of consumer stages, so it is returned
    /// behind an `Arc` from the start.
    pub fn new(
        num_slots: usize,
        slot_size: usize,
        pool: Arc<MetadataPool>,
        name: &str,
    ) -> Arc<Self> {
        assert!(num_slots > 0, "ring '{}' must have at least one slot", name);
        assert!(slot_size > 0, "ring '{}' must have non-zero frames", name);

        let slots = (0..num_slots)
            .map(|_| FrameSlot {
                data: std::cell::UnsafeCell::new(FrameStorage::new(slot_size)),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Arc::new(Self {
            name: name.to_string(),
            num_slots,
            slot_size,
            slots,
            state: Mutex::new(RingState {
                full: vec![false; num_slots].into_boxed_slice(),
                metadata: vec![None; num_slots].into_boxed_slice(),
                remaining: vec![0; num_slots].into_boxed_slice(),
                consumed_by: Vec::new(),
                consumers: Vec::new(),
                producer_done: false,
                shutdown: false,
                production_started: false,
            }),
            full_cond: Condvar::new(),
            empty_cond: Condvar::new(),
            pool,
            frames_produced: CachePadded::new(AtomicU64::new(0)),
            frames_consumed: CachePadded::new(AtomicU64::new(0)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Pool the attached metadata records come from. Producers acquire
    /// records for outgoing frames here.
    pub fn pool(&self) -> &Arc<MetadataPool> {
        &self.pool
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced.load(Relaxed)
    }

    pub fn frames_consumed(&self) -> u64 {
        self.frames_consumed.load(Relaxed)
    }

    // --- Consumer registration ---

    /// Register a consumer. Must happen before the first `mark_full`; a slot
    /// only returns to empty once every registered consumer has released it,
    /// so late registration would desynchronise the occupancy counts.
    pub fn register_consumer(&self, consumer_name: &str) -> ConsumerId {
        let mut state = self.state.lock();
        assert!(
            !state.production_started,
            "consumer '{}' registered on ring '{}' after production started",
            consumer_name, self.name
        );
        let id = state.consumers.len();
        state.consumers.push(consumer_name.to_string());
        state
            .consumed_by
            .push(vec![false; self.num_slots].into_boxed_slice());
        ConsumerId(id)
    }

    // --- Producer side ---

    /// Block until `slot_id` is empty and available for writing.
    ///
    /// Returns `false` if shutdown was requested while waiting; the producer
    /// should exit its loop without publishing.
    pub fn wait_for_empty(&self, slot_id: usize) -> bool {
        let mut state = self.state.lock();
        while state.full[slot_id] && !state.shutdown {
            self.empty_cond.wait(&mut state);
        }
        !state.shutdown
    }

    /// Attach a metadata record to a slot the producer owns. The slot takes
    /// over the producer's reference; `mark_full` adds one reference per
    /// additional consumer.
    pub fn set_metadata(&self, slot_id: usize, meta: MetadataRef) {
        let mut state = self.state.lock();
        assert!(
            !state.full[slot_id],
            "metadata attached to published slot {} of ring '{}'",
            slot_id, self.name
        );
        state.metadata[slot_id] = Some(meta);
    }

    /// Stamp the metadata already attached to a producer-owned slot.
    pub fn update_metadata<R>(&self, slot_id: usize, f: impl FnOnce(&mut FrameMetadata) -> R) -> R {
        let meta = self.metadata_ref(slot_id);
        self.pool.update(meta, f)
    }

    /// Publish `slot_id`: the slot becomes full and every waiting consumer
    /// is woken. The attached metadata gains one reference per registered
    /// consumer beyond the first.
    pub fn mark_full(&self, slot_id: usize) {
        let mut state = self.state.lock();
        assert!(
            !state.full[slot_id],
            "double mark_full on slot {} of ring '{}'",
            slot_id, self.name
        );
        assert!(
            !state.producer_done,
            "mark_full after mark_producer_done on ring '{}'",
            self.name
        );
        let num_consumers = state.consumers.len();
        assert!(
            num_consumers > 0,
            "ring '{}' has no registered consumers",
            self.name
        );
        let meta = state.metadata[slot_id]
            .unwrap_or_else(|| panic!("slot {} of ring '{}' published without metadata", slot_id, self.name));
        for _ in 1..num_consumers {
            self.pool.retain(meta);
        }

        state.full[slot_id] = true;
        state.remaining[slot_id] = num_consumers as u32;
        state.production_started = true;
        drop(state);

        self.frames_produced.fetch_add(1, Relaxed);
        self.full_cond.notify_all();
    }

    /// Raise EOF. Monotonic; consumers drain the remaining full slots and
    /// then observe the sentinel.
    pub fn mark_producer_done(&self) {
        let mut state = self.state.lock();
        state.producer_done = true;
        drop(state);
        debug!("ring '{}': producer done", self.name);
        self.full_cond.notify_all();
    }

    // --- Consumer side ---

    /// Block until one of `candidates` is full and not yet consumed by this
    /// consumer; return its slot id. When several candidates are full the
    /// lowest slot id wins, which keeps multi-producer multiplexing
    /// deterministic. Returns `None` on EOF or shutdown.
    pub fn get_full_from_list(&self, id: ConsumerId, candidates: &[usize]) -> Option<usize> {
        let mut state = self.state.lock();
        loop {
            let hit = candidates
                .iter()
                .copied()
                .filter(|&s| state.full[s] && !state.consumed_by[id.0][s])
                .min();
            if let Some(slot) = hit {
                return Some(slot);
            }
            if state.producer_done || state.shutdown {
                return None;
            }
            self.full_cond.wait(&mut state);
        }
    }

    /// Release this consumer's reference on the slot's metadata. Call before
    /// `mark_empty`; the attachment is dropped when the slot goes empty.
    pub fn release_info(&self, slot_id: usize) {
        let meta = self.metadata_ref(slot_id);
        self.pool.release(meta);
    }

    /// Clear this consumer's occupancy of `slot_id`. When the last consumer
    /// clears, the slot returns to empty and a blocked producer is woken.
    pub fn mark_empty(&self, id: ConsumerId, slot_id: usize) {
        let mut state = self.state.lock();
        assert!(
            state.full[slot_id],
            "mark_empty on non-full slot {} of ring '{}'",
            slot_id, self.name
        );
        assert!(
            !state.consumed_by[id.0][slot_id],
            "double mark_empty by consumer '{}' on slot {} of ring '{}'",
            state.consumers[id.0], slot_id, self.name
        );
        state.consumed_by[id.0][slot_id] = true;
        state.remaining[slot_id] -= 1;
        if state.remaining[slot_id] == 0 {
            state.full[slot_id] = false;
            state.metadata[slot_id] = None;
            for per_consumer in state.consumed_by.iter_mut() {
                per_consumer[slot_id] = false;
            }
            drop(state);
            self.frames_consumed.fetch_add(1, Relaxed);
            self.empty_cond.notify_all();
        }
    }

    // --- Teardown ---

    /// Cancel all blocking waits: producers see `wait_for_empty` fail and
    /// consumers see the EOF sentinel. Used by mode teardown only.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        drop(state);
        self.full_cond.notify_all();
        self.empty_cond.notify_all();
    }

    // --- Frame payload access ---
    //
    // Payload access is exclusive-by-protocol (see `FrameSlot`): producers
    // touch a slot only between a successful `wait_for_empty` and
    // `mark_full`, consumers only between `get_full_from_list` and
    // `mark_empty`. The state mutex inside those calls orders the hand-off.

    /// Copy a whole frame into the slot. Producer side.
    pub fn fill_frame(&self, slot_id: usize, src: &[u8]) {
        assert_eq!(
            src.len(),
            self.slot_size,
            "frame size mismatch on ring '{}'",
            self.name
        );
        self.frame_mut(slot_id, |dst| dst.copy_from_slice(src));
    }

    /// Read access to a slot's payload.
    pub fn frame<R>(&self, slot_id: usize, f: impl FnOnce(&[u8]) -> R) -> R {
        let storage = self.slots[slot_id].data.get();
        // Safety: slot is held by the caller per the ownership protocol.
        let bytes = unsafe {
            std::slice::from_raw_parts((*storage).as_ptr(), (*storage).len())
        };
        f(bytes)
    }

    /// Write access to a slot's payload. Producer side.
    pub fn frame_mut<R>(&self, slot_id: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let storage = self.slots[slot_id].data.get();
        // Safety: slot is held exclusively by the producer per the protocol.
        let bytes = unsafe {
            std::slice::from_raw_parts_mut((*storage).as_ptr(), (*storage).len())
        };
        f(bytes)
    }

    /// Raw pointer to a slot's payload, for device registration (pinning).
    pub fn frame_ptr(&self, slot_id: usize) -> *mut u8 {
        unsafe { (*self.slots[slot_id].data.get()).as_ptr() }
    }

    // --- Metadata accessors ---

    fn metadata_ref(&self, slot_id: usize) -> MetadataRef {
        self.state.lock().metadata[slot_id]
            .unwrap_or_else(|| panic!("slot {} of ring '{}' has no metadata", slot_id, self.name))
    }

    pub fn fpga_seq_num(&self, slot_id: usize) -> u64 {
        self.pool.get(self.metadata_ref(slot_id)).fpga_seq_num
    }

    pub fn first_packet_recv_time(&self, slot_id: usize) -> Timeval {
        self.pool.get(self.metadata_ref(slot_id)).first_packet_recv_time
    }

    pub fn stream_id(&self, slot_id: usize) -> PackedStreamId {
        self.pool.get(self.metadata_ref(slot_id)).stream_id
    }

    pub fn error_matrix(&self, slot_id: usize) -> ErrorMatrix {
        self.pool.get(self.metadata_ref(slot_id)).error_matrix
    }

    /// Acquire a metadata record from the ring's pool, attach it to a
    /// producer-owned slot and stamp it in one step.
    pub fn stamp_new_metadata(&self, slot_id: usize, f: impl FnOnce(&mut FrameMetadata)) {
        let meta = self
            .pool
            .acquire()
            .unwrap_or_else(|| panic!("metadata pool exhausted filling ring '{}'", self.name));
        self.pool.update(meta, f);
        self.set_metadata(slot_id, meta);
    }
}

// Safety: all shared mutation goes through the state mutex or the documented
// slot ownership protocol.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}
