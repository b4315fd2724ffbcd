//! Codec Module
//!
//! Text encodings for binary content carried in XML character data.

pub mod base64;

pub use self::base64::{decode, encode, encoded_len, Base64Decoder, Base64Encoder};
