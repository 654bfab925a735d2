//! Codec for sending bencoded values over a stream.
//!
//! Bencode is self-delimiting, so no length prefix is added: a value is
//! yielded as soon as its last byte is in the buffer.
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{decode_prefix, encode::encode_into, FormatError, Value};
use crate::error::Error;

/// Upper bound of buffered bytes for a single value.
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct BencodeCodec;

impl Encoder<&Value> for BencodeCodec {
    type Error = Error;

    fn encode(&mut self, item: &Value, dst: &mut BytesMut) -> Result<(), Error> {
        let mut buf = Vec::new();
        encode_into(item, &mut buf);
        dst.extend_from_slice(&buf);
        Ok(())
    }
}

impl Decoder for BencodeCodec {
    type Item = Value;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, Error> {
        if src.is_empty() {
            return Ok(None);
        }

        match decode_prefix(src) {
            Ok((value, consumed)) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            // the value is not complete yet
            Err(FormatError::UnexpectedEof) if src.len() < MAX_VALUE_SIZE => {
                Ok(None)
            }
            Err(FormatError::UnexpectedEof) => Err(Error::MessageTooLarge),
            Err(e) => Err(e.into()),
        }
    }
}
