//! Length-prefixed framing.
//!
//! ```text
//! +----------+---------------------------+
//! |  Length  |      Serialized Message    |
//! | 4 bytes  |      (Length bytes)        |
//! +----------+---------------------------+
//! ```
//!
//! The decoder yields raw frames; [`Message::decode`] runs separately so a
//! malformed frame is dropped without tearing down the stream. A length
//! above the configured maximum is fatal for the connection.

use crate::{Message, NetworkError, MAX_MESSAGE_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Length prefix size.
const LENGTH_SIZE: usize = 4;

/// Frame codec for the overlay protocol.
pub struct FrameCodec {
    max_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self { max_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: length,
                max: self.max_size,
            });
        }

        let total_size = LENGTH_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_SIZE);
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = item.encoded_len();
        if length > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: length,
                max: self.max_size,
            });
        }

        dst.reserve(LENGTH_SIZE + length);
        dst.put_u32(length as u32);
        item.encode_into(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = FrameCodec::new();
        let msg = Message::new(vec![1u8, 3], false);

        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(&buf[..4], &11u32.to_be_bytes());

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(Message::decode(frame).unwrap(), msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame() {
        let mut codec = FrameCodec::new();
        let mut full = BytesMut::new();
        codec
            .encode(Message::new(vec![1u8, 5], false), &mut full)
            .unwrap();

        let mut partial = BytesMut::from(&full[..7]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&full[7..]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn test_oversized_frame() {
        let mut codec = FrameCodec::with_max_size(16);
        let mut buf = BytesMut::new();
        buf.put_u32(17);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(NetworkError::MessageTooLarge { size: 17, max: 16 })
        ));

        let big = Message::new(vec![0u8; 32], false);
        assert!(codec.encode(big, &mut BytesMut::new()).is_err());
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Message::new(vec![1u8, 3], false), &mut buf).unwrap();
        codec.encode(Message::new(vec![1u8, 5], false), &mut buf).unwrap();

        let first = Message::decode(codec.decode(&mut buf).unwrap().unwrap()).unwrap();
        let second = Message::decode(codec.decode(&mut buf).unwrap().unwrap()).unwrap();
        assert_eq!(&first.body[..], &[1, 3]);
        assert_eq!(&second.body[..], &[1, 5]);
    }
}
