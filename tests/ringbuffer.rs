use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use visipipe::Core::pool::MetadataPool;
use visipipe::Pipeline::Buffer::Buffer::RingBuffer;

fn make_ring(num_slots: usize, slot_size: usize) -> (Arc<RingBuffer>, Arc<MetadataPool>) {
    let pool = MetadataPool::create(10 * num_slots);
    let ring = RingBuffer::new(num_slots, slot_size, pool.clone(), "test_ring");
    (ring, pool)
}

fn produce(ring: &RingBuffer, slot: usize, payload: &[u8], seq: u64) {
    assert!(ring.wait_for_empty(slot));
    ring.fill_frame(slot, payload);
    ring.stamp_new_metadata(slot, |m| m.fpga_seq_num = seq);
    ring.mark_full(slot);
}

#[test]
fn minimal_ring_fifo_then_eof() {
    let (ring, _pool) = make_ring(2, 8);
    let consumer = ring.register_consumer("reader");

    let first = [0x01u8; 8];
    let second = [0x02u8; 8];
    produce(&ring, 0, &first, 100);
    produce(&ring, 1, &second, 200);
    ring.mark_producer_done();

    let slot = ring.get_full_from_list(consumer, &[0]).unwrap();
    assert_eq!(slot, 0);
    assert_eq!(ring.fpga_seq_num(slot), 100);
    ring.frame(slot, |bytes| assert_eq!(bytes, &first));
    ring.release_info(slot);
    ring.mark_empty(consumer, slot);

    let slot = ring.get_full_from_list(consumer, &[1]).unwrap();
    assert_eq!(slot, 1);
    ring.frame(slot, |bytes| assert_eq!(bytes, &second));
    ring.release_info(slot);
    ring.mark_empty(consumer, slot);

    // Producer is done and nothing is left: EOF sentinel.
    assert_eq!(ring.get_full_from_list(consumer, &[0]), None);
    assert_eq!(ring.frames_produced(), 2);
    assert_eq!(ring.frames_consumed(), 2);
}

#[test]
fn fifo_order_with_random_payloads() {
    let (ring, _pool) = make_ring(4, 16);
    let consumer = ring.register_consumer("reader");

    let frames: Vec<Vec<u8>> = (0..32)
        .map(|_| (0..16).map(|_| fastrand::u8(..)).collect())
        .collect();

    let producer_ring = ring.clone();
    let producer_frames = frames.clone();
    let producer = thread::spawn(move || {
        for (n, payload) in producer_frames.iter().enumerate() {
            produce(&producer_ring, n % 4, payload, n as u64);
        }
        producer_ring.mark_producer_done();
    });

    for (n, expected) in frames.iter().enumerate() {
        let slot = ring.get_full_from_list(consumer, &[n % 4]).unwrap();
        assert_eq!(slot, n % 4);
        assert_eq!(ring.fpga_seq_num(slot), n as u64);
        ring.frame(slot, |bytes| assert_eq!(bytes, &expected[..]));
        ring.release_info(slot);
        ring.mark_empty(consumer, slot);
    }
    assert_eq!(ring.get_full_from_list(consumer, &[0]), None);
    producer.join().unwrap();
}

#[test]
fn producer_blocks_until_consumer_releases() {
    let (ring, _pool) = make_ring(1, 8);
    let consumer = ring.register_consumer("reader");

    produce(&ring, 0, &[0xAA; 8], 0);

    let unblocked = Arc::new(AtomicBool::new(false));
    let producer_ring = ring.clone();
    let producer_flag = unblocked.clone();
    let producer = thread::spawn(move || {
        // Ring is full: this must block until the consumer releases slot 0.
        produce(&producer_ring, 0, &[0xBB; 8], 1);
        producer_flag.store(true, Ordering::SeqCst);
    });

    thread::sleep(Duration::from_millis(100));
    assert!(!unblocked.load(Ordering::SeqCst), "producer overran a full ring");

    let slot = ring.get_full_from_list(consumer, &[0]).unwrap();
    ring.frame(slot, |bytes| assert_eq!(bytes[0], 0xAA));
    ring.release_info(slot);
    ring.mark_empty(consumer, slot);

    producer.join().unwrap();
    assert!(unblocked.load(Ordering::SeqCst));

    let slot = ring.get_full_from_list(consumer, &[0]).unwrap();
    ring.frame(slot, |bytes| assert_eq!(bytes[0], 0xBB));
    ring.release_info(slot);
    ring.mark_empty(consumer, slot);
}

#[test]
fn lowest_slot_id_wins_with_multiple_full_candidates() {
    let (ring, _pool) = make_ring(4, 8);
    let consumer = ring.register_consumer("reader");

    // Publish out of order relative to the candidate list.
    produce(&ring, 2, &[2; 8], 2);
    produce(&ring, 1, &[1; 8], 1);

    assert_eq!(ring.get_full_from_list(consumer, &[2, 1]), Some(1));
    ring.release_info(1);
    ring.mark_empty(consumer, 1);
    assert_eq!(ring.get_full_from_list(consumer, &[2, 1]), Some(2));
    ring.release_info(2);
    ring.mark_empty(consumer, 2);
}

#[test]
fn slot_returns_to_empty_only_after_last_consumer() {
    let (ring, _pool) = make_ring(1, 8);
    let first = ring.register_consumer("first");
    let second = ring.register_consumer("second");

    produce(&ring, 0, &[0x55; 8], 7);

    let slot = ring.get_full_from_list(first, &[0]).unwrap();
    ring.frame(slot, |bytes| assert_eq!(bytes[0], 0x55));
    ring.release_info(slot);
    ring.mark_empty(first, slot);

    // One consumer released but not the other: the ring stays full and a
    // second write must still block.
    let unblocked = Arc::new(AtomicBool::new(false));
    let producer_ring = ring.clone();
    let producer_flag = unblocked.clone();
    let producer = thread::spawn(move || {
        produce(&producer_ring, 0, &[0x66; 8], 8);
        producer_flag.store(true, Ordering::SeqCst);
    });
    thread::sleep(Duration::from_millis(100));
    assert!(!unblocked.load(Ordering::SeqCst));

    let slot = ring.get_full_from_list(second, &[0]).unwrap();
    ring.frame(slot, |bytes| assert_eq!(bytes[0], 0x55));
    ring.release_info(slot);
    ring.mark_empty(second, slot);

    producer.join().unwrap();
    assert!(unblocked.load(Ordering::SeqCst));
}

#[test]
fn eof_wakes_a_blocked_consumer() {
    let (ring, _pool) = make_ring(2, 8);
    let consumer = ring.register_consumer("reader");

    let consumer_ring = ring.clone();
    let waiter = thread::spawn(move || consumer_ring.get_full_from_list(consumer, &[0]));

    thread::sleep(Duration::from_millis(50));
    ring.mark_producer_done();

    assert_eq!(waiter.join().unwrap(), None);
}

#[test]
fn shutdown_cancels_producer_wait() {
    let (ring, _pool) = make_ring(1, 8);
    let _consumer = ring.register_consumer("reader");

    produce(&ring, 0, &[0; 8], 0);

    let producer_ring = ring.clone();
    let producer = thread::spawn(move || producer_ring.wait_for_empty(0));
    thread::sleep(Duration::from_millis(50));
    ring.shutdown();

    assert!(!producer.join().unwrap());
}
