//! Non-blocking, message-oriented channels decoupled from their selector
//! thread by lock-free, sequence-coordinated ring buffers.
//!
//! A [`config::ChannelBuilder`] produces a [`config::ChannelConfig`], which
//! [`channel::connect`]/[`channel::ServerChannel::bind`] turn into
//! [`channel::MessageChannel`]s backed by a [`selector::SelectorPool`].
//! Application code never touches a selector directly: it publishes to and
//! drains from the [`provider::Provider`] pair exposed by the channel.

pub mod availability_buffer;
pub mod channel;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod future;
pub mod group_producer;
pub mod key_processor;
pub mod multicast;
pub mod provider;
pub mod rate_limiter;
pub mod ring_buffer;
pub mod sequence;
pub mod sequencer;
pub mod selector;
pub mod utils;
pub mod wait_strategy;

pub mod prelude {
    pub use crate::channel::{connect, MessageChannel, ServerChannel};
    pub use crate::codec::{Codec, FrameLength, LengthPrefixedCodec};
    pub use crate::config::{BufferKind, ChannelBuilder, ChannelConfig, RateLimit, Transport};
    pub use crate::error::{ChannelsError, ChannelsResult};
    pub use crate::provider::{Consumer, Producer, Provider, RingProducer};
    pub use crate::selector::SelectorPool;
}
