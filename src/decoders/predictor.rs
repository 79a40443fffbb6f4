//! Predictor post-processing for Flate and LZW (ISO 32000-1, Table 8).
//!
//! XRef streams almost always use PNG Up (`/Predictor 12`) with `/Columns`
//! equal to the record width.

use crate::error::{Error, Result};
use crate::object::Dictionary;

/// `/DecodeParms` entries relevant to predictors and LZW.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeParams {
    pub predictor: i64,
    pub columns: usize,
    pub colors: usize,
    pub bits_per_component: usize,
    pub early_change: bool,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
            early_change: true,
        }
    }
}

impl DecodeParams {
    /// Read from a `/DecodeParms` dictionary; missing or malformed entries keep defaults.
    pub fn from_dict(dict: &Dictionary) -> Self {
        let defaults = Self::default();
        let positive = |key: &str, default: usize| {
            dict.get_integer(key)
                .and_then(|v| usize::try_from(v).ok())
                .filter(|&v| v > 0)
                .unwrap_or(default)
        };
        Self {
            predictor: dict.get_integer("Predictor").unwrap_or(defaults.predictor),
            columns: positive("Columns", defaults.columns),
            colors: positive("Colors", defaults.colors),
            bits_per_component: positive("BitsPerComponent", defaults.bits_per_component),
            early_change: dict.get_integer("EarlyChange").map_or(true, |v| v != 0),
        }
    }

    /// Bytes of one decoded row.
    pub fn row_bytes(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }

    /// Bytes per complete pixel, at least 1.
    fn pixel_bytes(&self) -> usize {
        ((self.colors * self.bits_per_component) / 8).max(1)
    }
}

/// Undo the predictor named in `params`.
pub fn decode_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        2 => decode_tiff_predictor(data, params),
        10..=15 => decode_png_predictor(data, params),
        other => Err(Error::Decode(format!("Unsupported predictor: {}", other))),
    }
}

/// TIFF Predictor 2, 8-bit components only.
fn decode_tiff_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    if params.bits_per_component != 8 {
        return Err(Error::Decode(format!(
            "TIFF predictor with {} bits per component",
            params.bits_per_component
        )));
    }
    let row_bytes = params.row_bytes();
    let colors = params.colors;
    let mut output = data.to_vec();
    for row in output.chunks_mut(row_bytes) {
        for i in colors..row.len() {
            row[i] = row[i].wrapping_add(row[i - colors]);
        }
    }
    Ok(output)
}

/// PNG predictors: every row starts with its own filter-type byte.
fn decode_png_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let row_bytes = params.row_bytes();
    let bpp = params.pixel_bytes();
    let stride = row_bytes + 1;

    let full_rows = data.len() / stride;
    if data.len() % stride != 0 {
        log::warn!(
            "PNG predictor: {} trailing bytes ignored (row size {})",
            data.len() % stride,
            stride
        );
    }

    let mut output = Vec::with_capacity(full_rows * row_bytes);
    let mut prev = vec![0u8; row_bytes];
    let mut row = vec![0u8; row_bytes];

    for encoded in data.chunks_exact(stride) {
        let filter = encoded[0];
        let encoded = &encoded[1..];
        for i in 0..row_bytes {
            let left = if i >= bpp { row[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            let predicted = match filter {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((left as u16 + up as u16) / 2) as u8,
                4 => paeth(left, up, up_left),
                other => {
                    return Err(Error::Decode(format!("Invalid PNG predictor tag: {}", other)));
                },
            };
            row[i] = encoded[i].wrapping_add(predicted);
        }
        output.extend_from_slice(&row);
        std::mem::swap(&mut prev, &mut row);
    }

    Ok(output)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
