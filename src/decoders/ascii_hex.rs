//! ASCIIHexDecode implementation.

use crate::decoders::StreamDecoder;
use crate::error::Result;
use crate::parser::decode_hex;

/// ASCIIHexDecode filter implementation.
///
/// Hex digit pairs up to the `>` end-of-data marker; whitespace is ignored and
/// an odd trailing digit is padded with 0.
pub struct AsciiHexDecoder;

impl StreamDecoder for AsciiHexDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let end = input.iter().position(|&c| c == b'>').unwrap_or(input.len());
        decode_hex(&input[..end])
    }

    fn name(&self) -> &str {
        "ASCIIHexDecode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_hex_decode() {
        assert_eq!(AsciiHexDecoder.decode(b"48 65 6C\n6C 6F>").unwrap(), b"Hello");
        assert_eq!(AsciiHexDecoder.decode(b"486>garbage").unwrap(), b"H`");
    }

    #[test]
    fn test_ascii_hex_invalid_digit() {
        assert!(AsciiHexDecoder.decode(b"4X").is_err());
    }
}
