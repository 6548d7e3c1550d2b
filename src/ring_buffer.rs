use crate::constants::ARRAY_PADDING;
use crate::error::{ChannelsError, ChannelsResult};
use crate::sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
use crate::utils;
use crate::wait_strategy::WaitStrategy;
use std::cell::UnsafeCell;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;

/// Whether a ring's producer side is written from a single owner or fanned
/// in from many.
pub enum SequencerKind {
    SingleProducer,
    MultiProducer,
}

/// A fixed-capacity, power-of-two ring of slots, decoupled from both the
/// I/O side and the application side by a [`Sequencer`] and a
/// [`WaitStrategy`].
///
/// `Ring` owns the slots and the per-slot attachment (the source address of
/// a datagram, when the channel is UDP/multicast) but has no notion of
/// "producer" or "consumer" identity; [`crate::provider::Producer`] and
/// [`crate::provider::Consumer`] are thin cursor-tracking views over it.
pub struct Ring<T: Default, W: WaitStrategy> {
    slots: Box<[UnsafeCell<T>]>,
    attachments: Box<[UnsafeCell<Option<SocketAddr>>]>,
    sequencer: Box<dyn Sequencer>,
    wait_strategy: W,
    mask: i64,
    capacity: i64,
}

impl<T: Default, W: WaitStrategy> Ring<T, W> {
    pub fn new(capacity: usize, kind: SequencerKind, wait_strategy: W) -> ChannelsResult<Self> {
        if capacity == 0 {
            return Err(ChannelsError::InvalidCapacity { requested: capacity });
        }
        let capacity = utils::round_up_to_power_of_two(capacity);
        let sequencer: Box<dyn Sequencer> = match kind {
            SequencerKind::SingleProducer => Box::new(SingleProducerSequencer::new(capacity)),
            SequencerKind::MultiProducer => Box::new(MultiProducerSequencer::new(capacity)),
        };

        Ok(Self {
            slots: Self::allocate(capacity),
            attachments: Self::allocate(capacity),
            sequencer,
            wait_strategy,
            mask: (capacity - 1) as i64,
            capacity: capacity as i64,
        })
    }

    fn allocate<V: Default>(capacity: usize) -> Box<[UnsafeCell<V>]> {
        (0..capacity + (ARRAY_PADDING << 1))
            .map(|_| UnsafeCell::new(V::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice()
    }

    #[inline(always)]
    fn index(&self, sequence: i64) -> usize {
        utils::wrap_index(sequence, self.mask, ARRAY_PADDING)
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub fn wait_strategy(&self) -> &W {
        &self.wait_strategy
    }

    /// Claims a single sequence, blocking (spinning) if the ring is full.
    pub fn acquire(&self, stopping: &AtomicBool) -> ChannelsResult<i64> {
        self.sequencer.next(stopping)
    }

    /// Claims `n` contiguous sequences, blocking if the ring cannot fit them.
    pub fn acquire_n(&self, n: usize, stopping: &AtomicBool) -> ChannelsResult<i64> {
        self.sequencer.next_n(n, stopping)
    }

    /// # Safety
    /// Caller must hold exclusive claim to `sequence` (returned by `acquire`
    /// and not yet published) for the duration of the borrow.
    #[allow(clippy::mut_from_ref)]
    pub fn slot_mut(&self, sequence: i64) -> &mut T {
        unsafe { &mut *self.slots[self.index(sequence)].get() }
    }

    pub fn slot(&self, sequence: i64) -> &T {
        unsafe { &*self.slots[self.index(sequence)].get() }
    }

    pub fn attach(&self, sequence: i64, addr: Option<SocketAddr>) {
        unsafe { *self.attachments[self.index(sequence)].get() = addr };
    }

    pub fn attachment(&self, sequence: i64) -> Option<SocketAddr> {
        unsafe { *self.attachments[self.index(sequence)].get() }
    }

    /// Publishes a single claimed sequence, making it visible to consumers.
    pub fn publish(&self, sequence: i64) {
        let became_non_empty = self.sequencer.get_gating_sequence_acquire() == sequence - 1;
        self.sequencer.publish_cursor_sequence(sequence);
        self.wait_strategy.on_release(became_non_empty);
    }

    pub fn publish_range(&self, low: i64, high: i64) {
        let became_non_empty = self.sequencer.get_gating_sequence_acquire() == low - 1;
        self.sequencer.publish_cursor_sequence_range(low, high);
        self.wait_strategy.on_release(became_non_empty);
    }

    /// Highest contiguously published sequence in `[low, high]`. For a
    /// single-producer ring this is always `high`; for a multi-producer ring
    /// it may be less, if an earlier producer has claimed but not yet
    /// published.
    pub fn highest_published(&self, low: i64, high: i64) -> i64 {
        self.sequencer.get_highest(low, high)
    }

    pub fn published_bound_relaxed(&self) -> i64 {
        self.sequencer.get_cursor_sequence_relaxed()
    }

    pub fn published_bound_acquire(&self) -> i64 {
        self.sequencer.get_cursor_sequence_acquire()
    }

    pub fn consumed_relaxed(&self) -> i64 {
        self.sequencer.get_gating_sequence_relaxed()
    }

    pub fn consumed_acquire(&self) -> i64 {
        self.sequencer.get_gating_sequence_acquire()
    }

    /// Advances the gating (consumer) sequence, unblocking producers waiting
    /// on space up to `sequence`.
    pub fn advance_consumed(&self, sequence: i64) {
        self.sequencer.publish_gating_sequence(sequence);
    }

    pub fn park(&self, stopping: &AtomicBool) {
        self.wait_strategy.park(stopping);
    }

    /// Free capacity between the last claim and the last consumed sequence.
    pub fn remaining(&self) -> i64 {
        self.capacity - (self.sequencer.get_cursor_sequence_relaxed() - self.sequencer.get_gating_sequence_relaxed())
    }
}

unsafe impl<T: Default, W: WaitStrategy> Sync for Ring<T, W> {}

unsafe impl<T: Default, W: WaitStrategy> Send for Ring<T, W> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait_strategy::BlockingWaitStrategy;

    #[test]
    fn rounds_capacity_up_and_rejects_zero() {
        let ring: Ring<i32, BlockingWaitStrategy> =
            Ring::new(5, SequencerKind::SingleProducer, BlockingWaitStrategy::new()).unwrap();
        assert_eq!(ring.capacity(), 8);

        let err = Ring::<i32, BlockingWaitStrategy>::new(0, SequencerKind::SingleProducer, BlockingWaitStrategy::new());
        assert!(matches!(err, Err(ChannelsError::InvalidCapacity { requested: 0 })));
    }

    #[test]
    fn single_producer_acquire_publish_roundtrip() {
        let ring: Ring<i32, BlockingWaitStrategy> =
            Ring::new(4, SequencerKind::SingleProducer, BlockingWaitStrategy::new()).unwrap();
        let stopping = AtomicBool::new(false);

        let seq = ring.acquire(&stopping).unwrap();
        *ring.slot_mut(seq) = 42;
        ring.publish(seq);

        assert_eq!(ring.highest_published(0, seq), seq);
        assert_eq!(*ring.slot(seq), 42);
        ring.advance_consumed(seq);
        assert_eq!(ring.remaining(), 4);
    }

    #[test]
    fn attachment_round_trips_source_address() {
        let ring: Ring<i32, BlockingWaitStrategy> =
            Ring::new(2, SequencerKind::MultiProducer, BlockingWaitStrategy::new()).unwrap();
        let stopping = AtomicBool::new(false);
        let seq = ring.acquire(&stopping).unwrap();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        ring.attach(seq, Some(addr));
        assert_eq!(ring.attachment(seq), Some(addr));
    }
}
