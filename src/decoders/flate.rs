//! FlateDecode implementation.
//!
//! Zlib-wrapped deflate per RFC 1950/1951. Damaged streams are common in the
//! wild, so a failing zlib read falls back to raw deflate, and whatever was
//! inflated before the corruption is kept.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

/// FlateDecode filter implementation.
pub struct FlateDecoder;

impl StreamDecoder for FlateDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        let zlib_err = match ZlibDecoder::new(input).read_to_end(&mut output) {
            Ok(_) => return Ok(output),
            Err(e) => e,
        };
        if !output.is_empty() {
            log::warn!(
                "FlateDecode partial recovery: kept {} bytes before corruption: {}",
                output.len(),
                zlib_err
            );
            return Ok(output);
        }

        // Corrupt zlib header over valid deflate data: skip the 2-byte header
        let body = if input.len() > 2 { &input[2..] } else { input };
        for candidate in [input, body] {
            output.clear();
            match DeflateDecoder::new(candidate).read_to_end(&mut output) {
                Ok(_) if !output.is_empty() => {
                    log::info!("Raw deflate recovery succeeded: {} bytes", output.len());
                    return Ok(output);
                },
                Err(_) if !output.is_empty() => {
                    log::warn!("Raw deflate partial recovery: kept {} bytes", output.len());
                    return Ok(output);
                },
                _ => {},
            }
        }

        Err(Error::Decode(format!("FlateDecode error: {}", zlib_err)))
    }

    fn name(&self) -> &str {
        "FlateDecode"
    }
}
