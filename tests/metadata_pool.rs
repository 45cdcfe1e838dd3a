use std::sync::Arc;

use visipipe::Core::pool::MetadataPool;
use visipipe::Pipeline::Buffer::Buffer::RingBuffer;

// Metadata conservation: at all times the number of acquired records equals
// the number of non-empty frames across all rings (plus records producers
// hold for frames under construction).

#[test]
fn records_track_non_empty_frames() {
    let pool = MetadataPool::create(8);
    let ring_a = RingBuffer::new(2, 16, pool.clone(), "ring_a");
    let ring_b = RingBuffer::new(2, 16, pool.clone(), "ring_b");
    let consumer_a = ring_a.register_consumer("a_reader");
    let consumer_b = ring_b.register_consumer("b_reader");

    assert_eq!(pool.outstanding(), 0);

    for (n, ring) in [&ring_a, &ring_b, &ring_a].iter().enumerate() {
        let slot = n % 2;
        assert!(ring.wait_for_empty(slot));
        ring.fill_frame(slot, &[n as u8; 16]);
        ring.stamp_new_metadata(slot, |m| m.fpga_seq_num = n as u64);
        ring.mark_full(slot);
    }
    assert_eq!(pool.outstanding(), 3);

    let slot = ring_a.get_full_from_list(consumer_a, &[0]).unwrap();
    ring_a.release_info(slot);
    ring_a.mark_empty(consumer_a, slot);
    assert_eq!(pool.outstanding(), 2);

    let slot = ring_b.get_full_from_list(consumer_b, &[1]).unwrap();
    ring_b.release_info(slot);
    ring_b.mark_empty(consumer_b, slot);
    assert_eq!(pool.outstanding(), 1);

    let slot = ring_a.get_full_from_list(consumer_a, &[0, 1]).unwrap();
    ring_a.release_info(slot);
    ring_a.mark_empty(consumer_a, slot);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn multi_consumer_frames_hold_one_record_until_both_release() {
    let pool = MetadataPool::create(4);
    let ring = RingBuffer::new(1, 8, pool.clone(), "shared");
    let first = ring.register_consumer("first");
    let second = ring.register_consumer("second");

    assert!(ring.wait_for_empty(0));
    ring.fill_frame(0, &[1; 8]);
    ring.stamp_new_metadata(0, |m| m.fpga_seq_num = 9);
    ring.mark_full(0);
    assert_eq!(pool.outstanding(), 1);

    let slot = ring.get_full_from_list(first, &[0]).unwrap();
    assert_eq!(ring.fpga_seq_num(slot), 9);
    ring.release_info(slot);
    ring.mark_empty(first, slot);
    // The second consumer still references the record.
    assert_eq!(pool.outstanding(), 1);

    let slot = ring.get_full_from_list(second, &[0]).unwrap();
    ring.release_info(slot);
    ring.mark_empty(second, slot);
    assert_eq!(pool.outstanding(), 0);
}

#[test]
fn exhausted_pool_returns_none() {
    let pool = MetadataPool::create(2);
    let a = pool.acquire().unwrap();
    let _b = pool.acquire().unwrap();
    assert!(pool.acquire().is_none());

    pool.release(a);
    assert!(pool.acquire().is_some());
}

#[test]
fn concurrent_acquire_release_conserves_records() {
    let pool = MetadataPool::create(64);
    let mut handles = Vec::new();
    for _ in 0..4 {
        let pool: Arc<MetadataPool> = pool.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..1000 {
                let r = pool.acquire().expect("pool sized for all threads");
                pool.retain(r);
                pool.release(r);
                pool.release(r);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(pool.outstanding(), 0);
}
