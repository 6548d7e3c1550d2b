use crate::error::ChannelsResult;
use crate::ring_buffer::{Ring, SequencerKind};
use crate::wait_strategy::{BlockingWaitStrategy, WakeupSink, WakeupWaitStrategy};
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Narrow producer-side view over a ring, implemented by [`Producer`] and by
/// [`crate::group_producer::GroupProducer`] so both can be handed to code
/// that only needs to publish.
pub trait RingProducer<T> {
    fn acquire(&self, stopping: &AtomicBool) -> ChannelsResult<i64>;
    fn acquire_n(&self, n: usize, stopping: &AtomicBool) -> ChannelsResult<i64>;
    fn slot_mut(&self, sequence: i64) -> &mut T;
    fn attach(&self, sequence: i64, addr: Option<SocketAddr>);
    fn release(&self, sequence: i64);
    fn release_range(&self, low: i64, high: i64);
    fn remaining(&self) -> i64;
}

/// The outbound ring's wait strategy: many application threads may publish
/// concurrently, and publishing into an empty ring must wake the selector.
pub type OutboundRing<T> = Ring<T, WakeupWaitStrategy>;

/// The inbound ring's wait strategy: only the owning selector thread
/// publishes, and the application consumer parks on a condvar between
/// deliveries.
pub type InboundRing<T> = Ring<T, BlockingWaitStrategy>;

/// Producer handle over a shared ring. Cheaply cloneable; any number of
/// producer handles may exist for a multi-producer ring.
#[derive(Clone)]
pub struct Producer<T: Default, W: crate::wait_strategy::WaitStrategy> {
    ring: Arc<Ring<T, W>>,
}

impl<T: Default, W: crate::wait_strategy::WaitStrategy> Producer<T, W> {
    pub fn new(ring: Arc<Ring<T, W>>) -> Self {
        Self { ring }
    }

    pub fn ring(&self) -> &Arc<Ring<T, W>> {
        &self.ring
    }
}

impl<T: Default, W: crate::wait_strategy::WaitStrategy> RingProducer<T> for Producer<T, W> {
    fn acquire(&self, stopping: &AtomicBool) -> ChannelsResult<i64> {
        self.ring.acquire(stopping)
    }

    fn acquire_n(&self, n: usize, stopping: &AtomicBool) -> ChannelsResult<i64> {
        self.ring.acquire_n(n, stopping)
    }

    fn slot_mut(&self, sequence: i64) -> &mut T {
        self.ring.slot_mut(sequence)
    }

    fn attach(&self, sequence: i64, addr: Option<SocketAddr>) {
        self.ring.attach(sequence, addr)
    }

    fn release(&self, sequence: i64) {
        self.ring.publish(sequence)
    }

    fn release_range(&self, low: i64, high: i64) {
        self.ring.publish_range(low, high)
    }

    fn remaining(&self) -> i64 {
        self.ring.remaining()
    }
}

/// Consumer handle over a shared ring. Unlike [`Producer`], a ring has
/// exactly one consumer: the cursor tracked here is the consumer's own
/// private state, not shared across clones.
pub struct Consumer<T: Default, W: crate::wait_strategy::WaitStrategy> {
    ring: Arc<Ring<T, W>>,
    cursor: i64,
}

impl<T: Default, W: crate::wait_strategy::WaitStrategy> Consumer<T, W> {
    pub fn new(ring: Arc<Ring<T, W>>) -> Self {
        Self { ring, cursor: crate::sequence::INITIAL_VALUE }
    }

    /// Non-blocking: the inclusive `[low, high]` range newly available to
    /// read, or `None` if the consumer is caught up with the producer.
    pub fn poll(&self) -> Option<(i64, i64)> {
        let low = self.cursor + 1;
        let bound = self.ring.published_bound_acquire();
        if bound < low {
            return None;
        }
        let high = self.ring.highest_published(low, bound);
        if high < low {
            return None;
        }
        Some((low, high))
    }

    /// Blocks (parking on the ring's wait strategy) until at least one new
    /// sequence is available, or until `stopping` is observed.
    pub fn wait(&self, stopping: &AtomicBool) -> Option<(i64, i64)> {
        loop {
            if let Some(range) = self.poll() {
                return Some(range);
            }
            if stopping.load(std::sync::atomic::Ordering::Acquire) {
                return None;
            }
            self.ring.park(stopping);
        }
    }

    pub fn get(&self, sequence: i64) -> &T {
        self.ring.slot(sequence)
    }

    pub fn attachment(&self, sequence: i64) -> Option<SocketAddr> {
        self.ring.attachment(sequence)
    }

    /// Marks sequences up to and including `sequence` as consumed, freeing
    /// that capacity for producers.
    pub fn release_through(&mut self, sequence: i64) {
        self.cursor = sequence;
        self.ring.advance_consumed(sequence);
    }

    pub fn cursor(&self) -> i64 {
        self.cursor
    }
}

/// Bundles the two rings serving one channel:
/// outbound for application→channel messages (multi-producer, wakeup-wired),
/// inbound for channel→application messages (single-producer, blocking).
pub struct Provider<T: Default, U: Default> {
    outbound: Arc<OutboundRing<T>>,
    inbound: Arc<InboundRing<U>>,
}

impl<T: Default, U: Default> Provider<T, U> {
    pub fn new(outbound_capacity: usize, inbound_capacity: usize) -> ChannelsResult<Self> {
        Ok(Self {
            outbound: Arc::new(OutboundRing::new(
                outbound_capacity,
                SequencerKind::MultiProducer,
                WakeupWaitStrategy::new(),
            )?),
            inbound: Arc::new(InboundRing::new(
                inbound_capacity,
                SequencerKind::SingleProducer,
                BlockingWaitStrategy::new(),
            )?),
        })
    }

    /// Installs the selector-side wakeup callback on the outbound ring. Must
    /// be called once, before any producer handle is given to application
    /// code, so that publishing into an empty ring re-asserts write-interest
    /// without the ring holding a back-pointer to its processor.
    pub fn install_wakeup_sink(&self, sink: Arc<dyn WakeupSink>) {
        self.outbound.wait_strategy().install_sink(sink);
    }

    pub fn output_producer(&self) -> Producer<T, WakeupWaitStrategy> {
        Producer::new(self.outbound.clone())
    }

    pub fn output_consumer(&self) -> Consumer<T, WakeupWaitStrategy> {
        Consumer::new(self.outbound.clone())
    }

    pub fn input_producer(&self) -> Producer<U, BlockingWaitStrategy> {
        Producer::new(self.inbound.clone())
    }

    pub fn input_consumer(&self) -> Consumer<U, BlockingWaitStrategy> {
        Consumer::new(self.inbound.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn single_message_round_trips_through_provider() {
        let provider: Provider<i32, i32> = Provider::new(8, 8).unwrap();
        let stopping = AtomicBool::new(false);

        let producer = provider.input_producer();
        let seq = producer.acquire(&stopping).unwrap();
        *producer.slot_mut(seq) = 7;
        producer.release(seq);

        let mut consumer = provider.input_consumer();
        let (low, high) = consumer.wait(&stopping).unwrap();
        assert_eq!((low, high), (0, 0));
        assert_eq!(*consumer.get(high), 7);
        consumer.release_through(high);
        assert!(consumer.poll().is_none());
    }

    #[test]
    fn fifo_order_preserved_across_multiple_publishes() {
        let provider: Provider<i32, i32> = Provider::new(16, 16).unwrap();
        let stopping = AtomicBool::new(false);
        let producer = provider.output_producer();

        for i in 0..10 {
            let seq = producer.acquire(&stopping).unwrap();
            *producer.slot_mut(seq) = i;
            producer.release(seq);
        }

        let mut consumer = provider.output_consumer();
        let (low, high) = consumer.poll().unwrap();
        let observed: Vec<i32> = (low..=high).map(|s| *consumer.get(s)).collect();
        assert_eq!(observed, (0..10).collect::<Vec<_>>());
        consumer.release_through(high);
    }
}
