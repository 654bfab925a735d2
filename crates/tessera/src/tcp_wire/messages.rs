use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::{Block, BlockInfo};
use crate::{bitfield::Bitfield, error::Error};

/// Maximum accepted length prefix of a message. A full piece message of a
/// 16 KiB block is far smaller, anything above this is a protocol error.
pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Messages exchanged after a successful handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(usize),
    Bitfield(Bitfield),
    Request(BlockInfo),
    Piece(Block),
    Cancel(BlockInfo),
}

/// The IDs of the [`Message`]s.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = u8;

    fn try_from(k: u8) -> Result<Self, Self::Error> {
        use MessageId::*;
        match k {
            k if k == Choke as u8 => Ok(Choke),
            k if k == Unchoke as u8 => Ok(Unchoke),
            k if k == Interested as u8 => Ok(Interested),
            k if k == NotInterested as u8 => Ok(NotInterested),
            k if k == Have as u8 => Ok(Have),
            k if k == Bitfield as u8 => Ok(Bitfield),
            k if k == Request as u8 => Ok(Request),
            k if k == Piece as u8 => Ok(Piece),
            k if k == Cancel as u8 => Ok(Cancel),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PeerCodec;

impl Encoder<Message> for PeerCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, buf: &mut BytesMut) -> Result<(), Error> {
        match item {
            Message::KeepAlive => {
                buf.put_u32(0);
            }
            Message::Choke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Choke as u8);
            }
            Message::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Unchoke as u8);
            }
            Message::Interested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::Interested as u8);
            }
            Message::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(MessageId::NotInterested as u8);
            }
            // <len=0005><id=4><piece index>
            Message::Have(piece) => {
                buf.put_u32(1 + 4);
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(piece as u32);
            }
            // <len=0001+X><id=5><bitfield>
            Message::Bitfield(bitfield) => {
                let v = bitfield.into_vec();
                buf.put_u32(1 + v.len() as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.extend_from_slice(&v);
            }
            // <len=0013><id=6><index><begin><length>
            Message::Request(info) => {
                buf.put_u32(1 + 4 + 4 + 4);
                buf.put_u8(MessageId::Request as u8);
                info.encode(buf);
            }
            // <len=0009+X><id=7><index><begin><block>
            Message::Piece(block) => {
                buf.put_u32(1 + 4 + 4 + block.block.len() as u32);
                buf.put_u8(MessageId::Piece as u8);
                block.encode(buf);
            }
            // <len=0013><id=8><index><begin><length>
            Message::Cancel(info) => {
                buf.put_u32(1 + 4 + 4 + 4);
                buf.put_u8(MessageId::Cancel as u8);
                info.encode(buf);
            }
        }
        Ok(())
    }
}

impl Decoder for PeerCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, Error> {
        // messages with unknown ids are skipped, and the next one in the
        // buffer, if any, is tried.
        loop {
            // the length prefix must be present at the minimum
            if buf.len() < 4 {
                return Ok(None);
            }

            // peek at length prefix without consuming
            let size =
                u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

            if size == 0 {
                buf.advance(4);
                return Ok(Some(Message::KeepAlive));
            }

            if size > MAX_MESSAGE_SIZE {
                return Err(Error::MessageTooLarge);
            }

            // incomplete message, wait for the rest without advancing.
            if buf.len() < 4 + size {
                buf.reserve(4 + size - buf.len());
                return Ok(None);
            }

            buf.advance(4);
            let id = buf.get_u8();
            let payload_len = size - 1;

            let Ok(id) = MessageId::try_from(id) else {
                warn!("unknown message_id {id}, skipping {payload_len} bytes");
                buf.advance(payload_len);
                continue;
            };

            let mut payload = buf.split_to(payload_len);

            let msg = match id {
                MessageId::Choke => Message::Choke,
                MessageId::Unchoke => Message::Unchoke,
                MessageId::Interested => Message::Interested,
                MessageId::NotInterested => Message::NotInterested,
                MessageId::Have => {
                    if payload.len() != 4 {
                        return Err(Error::MessageInvalid);
                    }
                    Message::Have(payload.get_u32() as usize)
                }
                MessageId::Bitfield => {
                    Message::Bitfield(Bitfield::from_vec(payload.to_vec()))
                }
                MessageId::Request | MessageId::Cancel => {
                    if payload.len() != 12 {
                        return Err(Error::MessageInvalid);
                    }
                    let info = BlockInfo {
                        index: payload.get_u32(),
                        begin: payload.get_u32(),
                        len: payload.get_u32(),
                    };
                    if id == MessageId::Request {
                        Message::Request(info)
                    } else {
                        Message::Cancel(info)
                    }
                }
                MessageId::Piece => {
                    if payload.len() < 8 {
                        return Err(Error::MessageInvalid);
                    }
                    let index = payload.get_u32() as usize;
                    let begin = payload.get_u32();
                    Message::Piece(Block { index, begin, block: payload.to_vec() })
                }
            };

            return Ok(Some(msg));
        }
    }
}

// Core messages
//
// choke: <len=0001><id=0>
//   the sender will not answer requests until it unchokes.
// unchoke: <len=0001><id=1>
// interested: <len=0001><id=2>
//   the sender wants pieces the receiver has.
// not interested: <len=0001><id=3>
// have: <len=0005><id=4><piece index>
//   the sender just verified this piece.
// bitfield: <len=0001+X><id=5><bitfield>
//   only sent right after the handshake, MSB of the first byte is piece 0.
//   Spare bits at the end are zero.
// request: <len=0013><id=6><index><begin><length>
// piece: <len=0009+X><id=7><index><begin><block>
// cancel: <len=0013><id=8><index><begin><length>
