//! Streaming Base64 Codec
//!
//! Standard alphabet with mandatory canonical padding. XML whitespace
//! (space, tab, CR, LF) is ignored on input since it legitimately appears in
//! `xs:base64Binary` content; anything else outside the alphabet, missing or
//! excess padding, and non-zero bits in the last symbol are rejected.
//!
//! The streaming types hold a constant amount of state regardless of the
//! size of the content.

use std::io::{self, Read, Write};

use base64::engine::general_purpose::{GeneralPurpose, STANDARD};
use base64::read::DecoderReader;
use base64::write::EncoderWriter;
use base64::Engine as _;

use crate::error::EncodingError;

/// Check for characters skipped while decoding
#[inline]
fn is_xml_whitespace(b: u8) -> bool {
    b == b' ' || b == b'\t' || b == b'\n' || b == b'\r'
}

/// Encode bytes to a padded base64 string
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Length of the encoded form of `len` input bytes
pub fn encoded_len(len: usize) -> usize {
    len.div_ceil(3) * 4
}

/// Decode a base64 string, skipping embedded whitespace
pub fn decode(data: &str) -> Result<Vec<u8>, EncodingError> {
    let symbols: Vec<u8> = data
        .bytes()
        .filter(|&b| !is_xml_whitespace(b))
        .collect();
    Ok(STANDARD.decode(symbols)?)
}

/// Streaming encoder writing base64 text to an inner writer
pub struct Base64Encoder<W: Write> {
    inner: EncoderWriter<'static, GeneralPurpose, W>,
}

impl<W: Write> Base64Encoder<W> {
    pub fn new(out: W) -> Self {
        Base64Encoder {
            inner: EncoderWriter::new(out, &STANDARD),
        }
    }

    /// Flush the final (padded) quantum and return the inner writer
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.finish()
    }
}

impl<W: Write> Write for Base64Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader that drops XML whitespace from the underlying stream
struct WhitespaceFilter<R: Read> {
    inner: R,
}

impl<R: Read> Read for WhitespaceFilter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.inner.read(buf)?;
            if n == 0 {
                return Ok(0);
            }
            let mut kept = 0;
            for i in 0..n {
                let b = buf[i];
                if !is_xml_whitespace(b) {
                    buf[kept] = b;
                    kept += 1;
                }
            }
            if kept > 0 {
                return Ok(kept);
            }
        }
    }
}

/// Streaming decoder reading base64 text from an inner reader
pub struct Base64Decoder<R: Read> {
    inner: DecoderReader<'static, GeneralPurpose, WhitespaceFilter<R>>,
}

impl<R: Read> Base64Decoder<R> {
    pub fn new(input: R) -> Self {
        Base64Decoder {
            inner: DecoderReader::new(WhitespaceFilter { inner: input }, &STANDARD),
        }
    }
}

impl<R: Read> Read for Base64Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_padding() {
        assert!(decode("cw").is_err());
    }

    #[test]
    fn test_excess_padding() {
        assert!(decode("cw===").is_err());
    }

    #[test]
    fn test_non_zero_trailing_bits() {
        assert_eq!(decode("//=="), Err(EncodingError::NonZeroTrailingBits));
    }

    #[test]
    fn test_embedded_whitespace() {
        let decoded = decode(" YW55IG\tNhcm5hbC\r\nBwb  GVhc3VyZS4 = ").unwrap();
        assert_eq!(decoded, b"any carnal pleasure.");
    }

    #[test]
    fn test_invalid_character() {
        assert!(matches!(
            decode("YW5*"),
            Err(EncodingError::InvalidCharacter { byte: b'*', .. })
        ));
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode(b"any carnal pleasure"), "YW55IGNhcm5hbCBwbGVhc3VyZQ==");
        assert_eq!(encoded_len(19), 28);
        assert_eq!(encoded_len(0), 0);
    }

    #[test]
    fn test_streaming_encoder() {
        let mut enc = Base64Encoder::new(Vec::new());
        enc.write_all(b"any carnal ").unwrap();
        enc.write_all(b"pleasure.").unwrap();
        let out = enc.finish().unwrap();
        assert_eq!(out, b"YW55IGNhcm5hbCBwbGVhc3VyZS4=");
    }

    #[test]
    fn test_streaming_decoder_skips_whitespace() {
        let text = b"YW55IGNh\r\ncm5hbCBw\r\nbGVhc3Vy\r\nZS4=";
        let mut dec = Base64Decoder::new(&text[..]);
        let mut out = Vec::new();
        dec.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"any carnal pleasure.");
    }

    #[test]
    fn test_streaming_decoder_rejects_garbage() {
        let mut dec = Base64Decoder::new(&b"YW5*"[..]);
        let mut out = Vec::new();
        assert!(dec.read_to_end(&mut out).is_err());
    }
}
