//! Producer/consumer ring over the frame-buffer slots.
//!
//! Two FIFO queues, each with its own lock and condition variable: the
//! write queue holds slots the producer may fill, the read queue holds
//! slots the consumer may present. A slot index is always in exactly one
//! place: one of the queues, or held by the thread that last acquired
//! it. With N slots the producer can run at most N - 1 frames ahead of
//! the consumer, since it must wait for a slot recycled by
//! [`release_read`](MultiBufferRing::release_read).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// The ring was closed while (or before) waiting for a slot.
///
/// Not a failure: this is the shutdown signal, telling the blocked loop
/// to exit instead of hanging on a counterpart that already stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("buffer ring closed")]
pub struct RingClosed;

/// One waitable FIFO of slot indices.
///
/// The closed flag lives under the queue's own lock, so a close cannot
/// slip between a waiter's predicate check and its wait.
struct SlotQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

struct QueueState {
    slots: VecDeque<usize>,
    closed: bool,
}

impl SlotQueue {
    fn new(slots: VecDeque<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                slots,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn acquire(&self) -> Result<usize, RingClosed> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(RingClosed);
            }
            if let Some(slot) = state.slots.pop_front() {
                return Ok(slot);
            }
            state = self.available.wait(state).unwrap();
        }
    }

    fn release(&self, slot: usize) {
        let mut state = self.state.lock().unwrap();
        state.slots.push_back(slot);
        drop(state);
        self.available.notify_one();
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.available.notify_all();
    }
}

/// Hands the N frame-buffer slots between one producer and one consumer.
///
/// The ring is the sole arbiter of slot ownership: a slot's contents
/// belong exclusively to whichever thread currently holds its index, and
/// the same index is never handed to both sides at once.
pub struct MultiBufferRing {
    write_queue: SlotQueue,
    read_queue: SlotQueue,
}

impl MultiBufferRing {
    /// Create a ring over `slot_count` slots, all initially writable.
    pub fn new(slot_count: usize) -> Self {
        Self {
            write_queue: SlotQueue::new((0..slot_count).collect()),
            read_queue: SlotQueue::new(VecDeque::new()),
        }
    }

    /// Block until a slot is free to fill, FIFO order.
    pub fn acquire_write(&self) -> Result<usize, RingClosed> {
        self.write_queue.acquire()
    }

    /// Publish a filled slot to the consumer; wakes one blocked reader.
    pub fn release_write(&self, slot: usize) {
        self.read_queue.release(slot);
    }

    /// Block until a filled slot is ready to present, FIFO order.
    pub fn acquire_read(&self) -> Result<usize, RingClosed> {
        self.read_queue.acquire()
    }

    /// Recycle a presented slot to the producer; wakes one blocked writer.
    pub fn release_read(&self, slot: usize) {
        self.write_queue.release(slot);
    }

    /// Close both queues. Idempotent; wakes every blocked waiter, and any
    /// later acquire returns [`RingClosed`] immediately.
    pub fn close(&self) {
        self.write_queue.close();
        self.read_queue.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn initial_handout_is_ascending() {
        let ring = MultiBufferRing::new(4);
        for expected in 0..4usize {
            assert_eq!(ring.acquire_write(), Ok(expected));
        }
    }

    #[test]
    fn two_slot_handoff_preserves_availability_order() {
        let ring = MultiBufferRing::new(2);

        assert_eq!(ring.acquire_write(), Ok(0));
        ring.release_write(0);
        assert_eq!(ring.acquire_read(), Ok(0));
        ring.release_read(0);

        // Slot 1 was queued before the recycled 0 came back.
        assert_eq!(ring.acquire_write(), Ok(1));
        ring.release_write(1);
        assert_eq!(ring.acquire_write(), Ok(0));
    }

    #[test]
    fn published_slots_come_back_in_publish_order() {
        let ring = MultiBufferRing::new(3);
        let a = ring.acquire_write().unwrap();
        let b = ring.acquire_write().unwrap();

        // Publish out of acquisition order; reads follow publish order.
        ring.release_write(b);
        ring.release_write(a);
        assert_eq!(ring.acquire_read(), Ok(b));
        assert_eq!(ring.acquire_read(), Ok(a));
    }

    #[test]
    fn blocked_producer_wakes_on_recycle() {
        let ring = Arc::new(MultiBufferRing::new(1));
        let slot = ring.acquire_write().unwrap();
        ring.release_write(slot);

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.acquire_write())
        };
        thread::sleep(Duration::from_millis(20));

        let read = ring.acquire_read().unwrap();
        ring.release_read(read);
        assert_eq!(producer.join().unwrap(), Ok(0));
    }

    #[test]
    fn close_wakes_all_blocked_waiters() {
        let ring = Arc::new(MultiBufferRing::new(2));
        // Drain the write queue so waiters on both sides block.
        ring.acquire_write().unwrap();
        ring.acquire_write().unwrap();

        let mut waiters = Vec::new();
        for _ in 0..2 {
            let ring = Arc::clone(&ring);
            waiters.push(thread::spawn(move || ring.acquire_write()));
        }
        {
            let ring = Arc::clone(&ring);
            waiters.push(thread::spawn(move || ring.acquire_read()));
        }

        // Let the threads reach their waits before waking them.
        thread::sleep(Duration::from_millis(50));
        ring.close();
        ring.close();

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Err(RingClosed));
        }
    }

    #[test]
    fn acquire_after_close_fails_even_with_slots_queued() {
        let ring = MultiBufferRing::new(2);
        ring.close();
        assert_eq!(ring.acquire_write(), Err(RingClosed));
        assert_eq!(ring.acquire_read(), Err(RingClosed));
    }

    #[test]
    fn pipeline_cycles_slots_round_robin() {
        let slot_count = 3usize;
        let iterations = 200usize;
        let ring = Arc::new(MultiBufferRing::new(slot_count));

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for _ in 0..iterations {
                    let slot = ring.acquire_write().unwrap();
                    ring.release_write(slot);
                }
            })
        };

        // FIFO through both queues keeps slots cycling in their original
        // order, so display order matches computation order.
        for i in 0..iterations {
            let slot = ring.acquire_read().unwrap();
            assert_eq!(slot, i % slot_count);
            ring.release_read(slot);
        }
        producer.join().unwrap();
    }

    proptest! {
        /// Model check: drive the ring with an arbitrary applicable
        /// operation sequence and verify slot conservation, FIFO order,
        /// and that no index is ever held by both sides.
        #[test]
        fn random_operation_sequences_conserve_slots(
            ops in proptest::collection::vec(0u8..4, 1..200),
        ) {
            let slot_count = 4;
            let ring = MultiBufferRing::new(slot_count);

            let mut write_queue: VecDeque<usize> = (0..slot_count).collect();
            let mut read_queue: VecDeque<usize> = VecDeque::new();
            let mut held_producer: VecDeque<usize> = VecDeque::new();
            let mut held_consumer: VecDeque<usize> = VecDeque::new();

            for op in ops {
                match op {
                    0 if !write_queue.is_empty() => {
                        let expected = write_queue.pop_front().unwrap();
                        prop_assert_eq!(ring.acquire_write(), Ok(expected));
                        held_producer.push_back(expected);
                    }
                    1 if !held_producer.is_empty() => {
                        let slot = held_producer.pop_front().unwrap();
                        ring.release_write(slot);
                        read_queue.push_back(slot);
                    }
                    2 if !read_queue.is_empty() => {
                        let expected = read_queue.pop_front().unwrap();
                        prop_assert_eq!(ring.acquire_read(), Ok(expected));
                        held_consumer.push_back(expected);
                    }
                    3 if !held_consumer.is_empty() => {
                        let slot = held_consumer.pop_front().unwrap();
                        ring.release_read(slot);
                        write_queue.push_back(slot);
                    }
                    _ => {}
                }

                let mut all: Vec<usize> = write_queue
                    .iter()
                    .chain(read_queue.iter())
                    .chain(held_producer.iter())
                    .chain(held_consumer.iter())
                    .copied()
                    .collect();
                all.sort_unstable();
                prop_assert_eq!(all, (0..slot_count).collect::<Vec<_>>());
            }
        }
    }
}
