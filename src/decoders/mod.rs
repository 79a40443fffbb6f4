//! Stream filter pipeline.
//!
//! XRef streams and object streams are almost always FlateDecode with a PNG
//! predictor; LZWDecode and ASCIIHexDecode show up in older producers. Image
//! filters are not needed to read document structure and are reported as
//! [`Error::UnsupportedFilter`].

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};

mod ascii_hex;
mod flate;
mod lzw;
mod predictor;

pub use ascii_hex::AsciiHexDecoder;
pub use flate::FlateDecoder;
pub use lzw::LzwDecoder;
pub use predictor::{decode_predictor, DecodeParams};

/// Stream decoder trait.
pub trait StreamDecoder {
    /// Decode the input data.
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Filter name as written in `/Filter`.
    fn name(&self) -> &str;
}

/// Filters this crate can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    FlateDecode,
    LZWDecode,
    ASCIIHexDecode,
}

impl Filter {
    /// Map a `/Filter` name, including the inline-image abbreviations.
    pub fn from_name(name: &str) -> Result<Filter> {
        match name {
            "FlateDecode" | "Fl" => Ok(Filter::FlateDecode),
            "LZWDecode" | "LZW" => Ok(Filter::LZWDecode),
            "ASCIIHexDecode" | "AHx" => Ok(Filter::ASCIIHexDecode),
            other => Err(Error::UnsupportedFilter(other.to_string())),
        }
    }

    fn decoder(self, params: Option<&DecodeParams>) -> Box<dyn StreamDecoder> {
        match self {
            Filter::FlateDecode => Box::new(FlateDecoder),
            Filter::LZWDecode => Box::new(LzwDecoder {
                early_change: params.map_or(true, |p| p.early_change),
            }),
            Filter::ASCIIHexDecode => Box::new(AsciiHexDecoder),
        }
    }

    fn uses_predictor(self) -> bool {
        matches!(self, Filter::FlateDecode | Filter::LZWDecode)
    }
}

/// `/Filter` and `/DecodeParms` of a stream dictionary, paired up.
///
/// Both entries may be a single value or an array; a null or missing
/// parameter entry means defaults.
pub fn stream_filters(dict: &Dictionary) -> Result<Vec<(Filter, Option<DecodeParams>)>> {
    let names: Vec<&str> = match dict.get("Filter") {
        None | Some(Object::Null) => Vec::new(),
        Some(Object::Name(n)) => vec![n.as_str()],
        Some(Object::Array(arr)) => arr
            .iter()
            .map(|f| {
                f.as_name()
                    .ok_or_else(|| Error::InvalidStream(format!("/Filter entry is {}", f.kind())))
            })
            .collect::<Result<_>>()?,
        Some(other) => return Err(Error::InvalidStream(format!("/Filter is {}", other.kind()))),
    };

    let params: Vec<Option<DecodeParams>> = match dict.get("DecodeParms") {
        Some(Object::Dictionary(d)) => vec![Some(DecodeParams::from_dict(d))],
        Some(Object::Array(arr)) => arr
            .iter()
            .map(|p| p.as_dict().map(DecodeParams::from_dict))
            .collect(),
        _ => Vec::new(),
    };

    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| Ok((Filter::from_name(name)?, params.get(i).cloned().flatten())))
        .collect()
}

/// Run `data` through `filters` in order.
///
/// `max_size` bounds every intermediate result (0 = unlimited).
pub fn decode_stream(
    data: &[u8],
    filters: &[(Filter, Option<DecodeParams>)],
    max_size: usize,
) -> Result<Vec<u8>> {
    let mut current = data.to_vec();

    for (filter, params) in filters {
        let decoder = filter.decoder(params.as_ref());
        current = decoder.decode(&current)?;

        if let Some(params) = params {
            if filter.uses_predictor() && params.predictor != 1 {
                current = decode_predictor(&current, params)?;
            }
        }

        if max_size > 0 && current.len() > max_size {
            return Err(Error::Decode(format!(
                "{} output of {} bytes exceeds limit of {} bytes",
                decoder.name(),
                current.len(),
                max_size
            )));
        }
    }

    Ok(current)
}

/// Decode the payload of a stream described by `dict`.
pub fn decode_stream_dict(dict: &Dictionary, data: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let filters = stream_filters(dict)?;
    decode_stream(data, &filters, max_size)
}
