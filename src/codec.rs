use crate::error::ChannelsResult;
use bytes::{Bytes, BytesMut};

/// Outcome of probing a decode buffer for a complete frame.
pub enum FrameLength {
    /// A complete frame of this many bytes (including any header) is
    /// present at the front of the buffer.
    Complete(usize),
    /// Not enough bytes buffered yet; wait for more reads.
    NeedMore,
}

/// Encodes/decodes frames against a channel's accumulated bytes. For TCP
/// the codec runs against a contiguous stream; for UDP each call of
/// `decode` is scoped to one already-received datagram.
pub trait Codec: Send + Sync {
    fn length(&self, buf: &BytesMut) -> FrameLength;

    /// Decodes and removes exactly one frame from the front of `buf`.
    /// Only called after `length` reported `Complete`.
    fn decode(&self, buf: &mut BytesMut) -> ChannelsResult<Bytes>;

    fn encode(&self, payload: &Bytes, buf: &mut BytesMut);
}

/// A 4-byte big-endian length prefix followed by the payload. The simplest
/// codec that satisfies the `length`/`decode`/`encode` contract, used by
/// the demo binary and integration tests.
pub struct LengthPrefixedCodec {
    max_frame_len: usize,
}

impl LengthPrefixedCodec {
    pub const HEADER_LEN: usize = 4;

    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Default for LengthPrefixedCodec {
    fn default() -> Self {
        Self::new(16 * 1024 * 1024)
    }
}

impl Codec for LengthPrefixedCodec {
    fn length(&self, buf: &BytesMut) -> FrameLength {
        if buf.len() < Self::HEADER_LEN {
            return FrameLength::NeedMore;
        }
        let payload_len = u32::from_be_bytes(buf[..Self::HEADER_LEN].try_into().unwrap()) as usize;
        let total = Self::HEADER_LEN + payload_len;
        if payload_len > self.max_frame_len {
            return FrameLength::Complete(total);
        }
        if buf.len() < total {
            FrameLength::NeedMore
        } else {
            FrameLength::Complete(total)
        }
    }

    fn decode(&self, buf: &mut BytesMut) -> ChannelsResult<Bytes> {
        let payload_len = u32::from_be_bytes(buf[..Self::HEADER_LEN].try_into().unwrap()) as usize;
        if payload_len > self.max_frame_len {
            return Err(crate::error::ChannelsError::Protocol(format!(
                "frame length {payload_len} exceeds max {}",
                self.max_frame_len
            )));
        }
        let mut frame = buf.split_to(Self::HEADER_LEN + payload_len);
        Ok(frame.split_off(Self::HEADER_LEN).freeze())
    }

    fn encode(&self, payload: &Bytes, buf: &mut BytesMut) {
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame() {
        let codec = LengthPrefixedCodec::default();
        let mut wire = BytesMut::new();
        let payload = Bytes::from_static(b"hello");
        codec.encode(&payload, &mut wire);

        match codec.length(&wire) {
            FrameLength::Complete(n) => assert_eq!(n, wire.len()),
            FrameLength::NeedMore => panic!("expected a complete frame"),
        }
        let decoded = codec.decode(&mut wire).unwrap();
        assert_eq!(decoded, payload);
        assert!(wire.is_empty());
    }

    #[test]
    fn reports_need_more_on_partial_header() {
        let codec = LengthPrefixedCodec::default();
        let wire = BytesMut::from(&[0u8, 0][..]);
        assert!(matches!(codec.length(&wire), FrameLength::NeedMore));
    }

    #[test]
    fn compacts_buffer_across_partial_frames() {
        let codec = LengthPrefixedCodec::default();
        let mut wire = BytesMut::new();
        codec.encode(&Bytes::from_static(b"ab"), &mut wire);
        let split_at = wire.len() - 1;
        let mut partial = wire.split_to(split_at);
        assert!(matches!(codec.length(&partial), FrameLength::NeedMore));
        partial.unsplit(wire);
        assert!(matches!(codec.length(&partial), FrameLength::Complete(_)));
    }
}
