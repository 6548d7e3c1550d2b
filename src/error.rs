use std::io;

/// Error surface for the channels core.
///
/// Most variants are recoverable and scoped to the affected channel or ring;
/// `Bug` is reserved for programming-invariant violations that should
/// never be caught and retried.
#[derive(Debug, thiserror::Error)]
pub enum ChannelsError {
    /// A blocking ring/limiter operation observed a cancellation request.
    #[error("operation interrupted")]
    Interrupted,

    /// A registration, connect, or accept future failed because the channel
    /// was already closed.
    #[error("channel is closed")]
    ChannelClosed,

    /// Read/write against a socket failed; the owning key processor moves to
    /// `CLOSING` as a result.
    #[error("I/O error on channel")]
    Io(#[from] io::Error),

    /// The codec rejected the bytes it was given.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A capacity or other constructor argument was invalid.
    #[error("invalid ring capacity: requested {requested}")]
    InvalidCapacity { requested: usize },

    /// A programming invariant was violated (e.g. group-producer sequence
    /// divergence). Not recoverable; callers should treat this as a bug.
    #[error("invariant violated: {0}")]
    Bug(String),
}

impl ChannelsError {
    /// `true` for errors that indicate a programming bug rather than a
    /// transient or caller-recoverable condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChannelsError::Bug(_))
    }
}

pub type ChannelsResult<T> = Result<T, ChannelsError>;
