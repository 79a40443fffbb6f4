//! LZWDecode implementation (ISO 32000-1, 7.4.4).
//!
//! PDF LZW uses MSB-first codes starting at 9 bits. With the default
//! `/EarlyChange 1` the code width grows one code early, which is the TIFF
//! size-switch behaviour in weezl.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};
use weezl::{decode::Decoder as WeezlDecoder, BitOrder, LzwStatus};

/// LZWDecode filter implementation.
pub struct LzwDecoder {
    /// `/EarlyChange` from the decode parameters
    pub early_change: bool,
}

impl Default for LzwDecoder {
    fn default() -> Self {
        Self { early_change: true }
    }
}

impl StreamDecoder for LzwDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = if self.early_change {
            WeezlDecoder::with_tiff_size_switch(BitOrder::Msb, 8)
        } else {
            WeezlDecoder::new(BitOrder::Msb, 8)
        };

        let mut output = Vec::new();
        let result = decoder.into_vec(&mut output).decode(input);
        match result.status {
            Ok(LzwStatus::Ok) | Ok(LzwStatus::Done) | Ok(LzwStatus::NoProgress) => Ok(output),
            Err(e) if !output.is_empty() => {
                log::warn!("LZWDecode partial recovery: kept {} bytes: {:?}", output.len(), e);
                Ok(output)
            },
            Err(e) => Err(Error::Decode(format!("LZWDecode error: {:?}", e))),
        }
    }

    fn name(&self) -> &str {
        "LZWDecode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weezl::encode::Encoder as WeezlEncoder;

    #[test]
    fn test_lzw_round_trip_early_change() {
        let original = b"-----A---B 1 0 obj << /Type /XRef >> -----A---B";
        let encoded = WeezlEncoder::with_tiff_size_switch(BitOrder::Msb, 8)
            .encode(original)
            .unwrap();
        let decoded = LzwDecoder::default().decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_lzw_pdf_reference_sample() {
        // Example from ISO 32000-1, 7.4.4.2
        let encoded = [0x80, 0x0B, 0x60, 0x50, 0x22, 0x0C, 0x0C, 0x85, 0x01];
        let decoded = LzwDecoder::default().decode(&encoded).unwrap();
        assert_eq!(decoded, b"-----A---B");
    }
}
