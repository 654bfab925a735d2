//! Bencode, the self-describing binary format used by metainfo files,
//! tracker responses and the directory protocol.
//!
//! Four types exist: integers (`i42e`), byte strings (`4:spam`), lists
//! (`l...e`) and dictionaries (`d...e`). Strings are raw bytes, digests and
//! peer ids go through the codec untouched. Dictionaries keep the order in
//! which their keys were inserted or decoded, no sorting is done on encode.
mod codec;
mod decode;
mod encode;
mod value;

pub use codec::BencodeCodec;
pub use decode::{decode, decode_prefix, MAX_DEPTH};
pub use encode::encode;
pub use value::Value;

use thiserror::Error;

/// Malformed bencode input. Aborts only the parse that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unexpected end of input")]
    UnexpectedEof,

    #[error("Invalid integer `{0}`")]
    InvalidInteger(String),

    #[error("Invalid byte string length")]
    InvalidStringLength,

    #[error("Unexpected byte `{0:#04x}` at offset {1}")]
    UnexpectedByte(u8, usize),

    #[error("Dictionary keys must be byte strings")]
    KeyNotString,

    #[error("Nesting is deeper than {MAX_DEPTH} levels")]
    NestingTooDeep,

    #[error("Trailing data after the value")]
    TrailingData,

    #[error("Expected field `{0}` of type {1}")]
    MissingField(&'static str, &'static str),
}
