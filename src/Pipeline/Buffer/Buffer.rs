// Bounded ring of fixed-size frames shared between pipeline stages

use crate::Core::pool::{MetadataPool, MetadataRef};
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Slot payloads are page-aligned so they can be handed to device I/O layers
/// (pinned/mapped) without copies.
pub const FRAME_ALIGN: usize = 4096;

/// Identity of one registered consumer of a [`RingBuffer`].
///
/// Handed out by `register_consumer`; every consumer-side call takes it so
/// the buffer can track per-consumer occupancy of each slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConsumerId(pub(crate) usize);

/// One frame's backing storage: a page-aligned, zero-initialised heap block
/// allocated once at buffer creation and reused for the life of the ring.
pub(crate) struct FrameStorage {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl FrameStorage {
    pub(crate) fn new(size: usize) -> Self {
        let layout = Layout::from_size_align(size, FRAME_ALIGN)
            .expect("frame size overflows allocation layout");
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).expect("frame allocation failed");
        Self { ptr, layout }
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for FrameStorage {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// One slot of the ring. Access to the payload is exclusive-by-protocol: a
/// single producer writes while the slot is empty, consumers only read while
/// it is full, and the full/empty transitions in `RingState` provide the
/// happens-before edges.
pub(crate) struct FrameSlot {
    pub(crate) data: UnsafeCell<FrameStorage>,
}

// Safety: payload access follows the slot ownership protocol above; the
// state mutex orders every hand-off between threads.
unsafe impl Send for FrameSlot {}
unsafe impl Sync for FrameSlot {}

/// Mutable ring state, all under one mutex. The payload bytes are NOT
/// guarded here; only the ownership flags are.
pub(crate) struct RingState {
    /// Slot is published and readable by consumers.
    pub(crate) full: Box<[bool]>,

    /// Metadata record attached to each full slot.
    pub(crate) metadata: Box<[Option<MetadataRef>]>,

    /// Consumers that have not yet released each full slot.
    pub(crate) remaining: Box<[u32]>,

    /// Per-consumer released markers, `consumed_by[consumer][slot]`. Cleared
    /// when the slot goes empty so the slot can be reused.
    pub(crate) consumed_by: Vec<Box<[bool]>>,

    /// Consumer names, index position is the `ConsumerId`.
    pub(crate) consumers: Vec<String>,

    /// EOF flag; monotonic once set.
    pub(crate) producer_done: bool,

    /// Teardown flag; cancels blocking waits.
    pub(crate) shutdown: bool,

    /// Set by the first `mark_full`; registration is refused afterwards.
    pub(crate) production_started: bool,
}

/// A bounded, blocking ring buffer of fixed-size frames.
///
/// This is the only channel between pipeline stages. It is built for the
/// single-producer, multi-consumer pattern of the stage graph:
///
/// ### Concurrency design
/// - **Producer side**: the producer writes slots in increasing modular
///   order, blocking in `wait_for_empty` when it catches up with the slowest
///   consumer. Overrun is backpressure, never drop.
/// - **Consumer side**: each consumer registers before production starts and
///   gets its own per-slot occupancy markers; a slot returns to *empty* only
///   when every consumer has released it.
/// - **EOF**: `mark_producer_done` is monotonic; consumers drain whatever is
///   still full and then observe the sentinel from `get_full_from_list`.
/// - **No timeouts**: a stuck ring indicates a mis-wired graph, which is a
///   configuration error to diagnose from the logs, not recover from.
pub struct RingBuffer {
    pub(crate) name: String,
    pub(crate) num_slots: usize,
    pub(crate) slot_size: usize,
    pub(crate) slots: Box<[FrameSlot]>,
    pub(crate) state: Mutex<RingState>,

    /// Signalled when a slot becomes full (or EOF/shutdown is raised).
    pub(crate) full_cond: Condvar,

    /// Signalled when a slot becomes empty (or shutdown is raised).
    pub(crate) empty_cond: Condvar,

    /// Pool the attached metadata records come from.
    pub(crate) pool: Arc<MetadataPool>,

    // Hot counters kept off the state mutex; padded to prevent false
    // sharing between the producer and consumer sides.
    pub(crate) frames_produced: CachePadded<AtomicU64>,
    pub(crate) frames_consumed: CachePadded<AtomicU64>,
}
