use crate::codec::{Codec, LengthPrefixedCodec};
use crate::constants::DEFAULT_RING_CAPACITY;
use crate::error::ChannelsResult;
use crate::rate_limiter::{NullRateLimiter, RateLimiter, TokenBucketRateLimiter};
use crate::utils::round_up_to_power_of_two;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    UdpMulticast,
}

/// Internal I/O buffer backing. Both variants use `bytes::BytesMut`;
/// `Direct` additionally pre-reserves its capacity up front instead of
/// growing on first use, trading startup allocation for avoiding a resize
/// under load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Heap,
    Direct,
}

/// An opaque hook for a TLS layer, scoped out as "specified only via
/// interfaces" — this crate defines the seam and does not
/// implement a handshake.
pub trait TlsContext: Send + Sync {}

#[derive(Clone)]
pub enum RateLimit {
    None,
    BytesPerSecond { send: u64, receive: u64 },
}

/// Immutable, validated configuration produced by [`ChannelBuilder::build`].
#[derive(Clone)]
pub struct ChannelConfig {
    pub transport: Transport,
    pub pool_size: usize,
    pub outbound_capacity: usize,
    pub inbound_capacity: usize,
    pub buffer_kind: BufferKind,
    pub rate_limit: RateLimit,
    pub codec: Arc<dyn Codec>,
    pub ssl_context: Option<Arc<dyn TlsContext>>,
    pub decoupled_processing_threshold: Option<usize>,
}

impl ChannelConfig {
    pub fn rate_limiter(&self) -> Arc<dyn RateLimiter> {
        match self.rate_limit {
            RateLimit::None => Arc::new(NullRateLimiter),
            RateLimit::BytesPerSecond { send, receive } => Arc::new(TokenBucketRateLimiter::new(send, receive)),
        }
    }
}

/// Builds a [`ChannelConfig`] from its enumerated builder options. A plain
/// in-memory builder, not a file-based config: nothing in the external
/// interface calls for serialized configuration.
pub struct ChannelBuilder {
    transport: Transport,
    pool_size: usize,
    capacity: usize,
    buffer_kind: BufferKind,
    rate_limit: RateLimit,
    codec: Arc<dyn Codec>,
    ssl_context: Option<Arc<dyn TlsContext>>,
    decoupled_processing_threshold: Option<usize>,
}

impl ChannelBuilder {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            pool_size: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            capacity: DEFAULT_RING_CAPACITY,
            buffer_kind: BufferKind::Heap,
            rate_limit: RateLimit::None,
            codec: Arc::new(LengthPrefixedCodec::default()),
            ssl_context: None,
            decoupled_processing_threshold: None,
        }
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn buffer_kind(mut self, kind: BufferKind) -> Self {
        self.buffer_kind = kind;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn ssl_context(mut self, ssl_context: Arc<dyn TlsContext>) -> Self {
        self.ssl_context = Some(ssl_context);
        self
    }

    pub fn decoupled_processing_threshold(mut self, threshold: usize) -> Self {
        self.decoupled_processing_threshold = Some(threshold);
        self
    }

    /// Rounds `capacity` up to the next power of two and validates it is
    /// non-zero, returning `ChannelsError::InvalidCapacity` instead of
    /// panicking since capacity is caller-supplied.
    pub fn build(self) -> ChannelsResult<ChannelConfig> {
        if self.capacity == 0 {
            return Err(crate::error::ChannelsError::InvalidCapacity { requested: 0 });
        }
        let capacity = round_up_to_power_of_two(self.capacity);
        Ok(ChannelConfig {
            transport: self.transport,
            pool_size: self.pool_size,
            outbound_capacity: capacity,
            inbound_capacity: capacity,
            buffer_kind: self.buffer_kind,
            rate_limit: self.rate_limit,
            codec: self.codec,
            ssl_context: self.ssl_context,
            decoupled_processing_threshold: self.decoupled_processing_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_rounds_capacity_and_defaults_rate_limit_to_none() {
        let config = ChannelBuilder::new(Transport::Tcp).capacity(100).build().unwrap();
        assert_eq!(config.outbound_capacity, 128);
        assert!(matches!(config.rate_limit, RateLimit::None));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = ChannelBuilder::new(Transport::Tcp).capacity(0).build();
        assert!(err.is_err());
    }
}
