//! Object streams (PDF 1.5+).
//!
//! An object stream packs several indirect objects into one stream:
//!
//! ```text
//! 12 0 obj
//! << /Type /ObjStm /N 2 /First 9 /Filter /FlateDecode >>
//! stream
//! 10 0 11 15              % (object number, offset) pairs; /First bytes long
//! << /Type /Page >>       % object 10, at /First + 0
//! [1 2 3]                 % object 11, at /First + 15
//! endstream
//! endobj
//! ```
//!
//! Objects inside are always generation 0 and are never encrypted on their
//! own; the container stream is decrypted as a whole before decoding.

use crate::decoders::decode_stream_dict;
use crate::error::{Error, Result};
use crate::lexer::{self, Token};
use crate::object::{IndirectObject, Object, Reference};
use crate::parser::parse_object;

/// Largest `/N` accepted.
const MAX_OBJECTS: i64 = 1_000_000;

/// Decoded object stream with its header read.
#[derive(Debug, Clone)]
pub struct ObjectStream {
    reference: Reference,
    data: Vec<u8>,
    first: usize,
    entries: Vec<(u32, usize)>,
}

impl ObjectStream {
    /// Decode `container`, whose payload must be loaded and decrypted.
    pub fn parse(container: &IndirectObject, max_decompressed_size: usize) -> Result<Self> {
        let reference = container.indirect_reference();
        let invalid = |reason: String| Error::InvalidStream(format!("object stream {}: {}", reference, reason));

        let dict = container.dictionary()?;
        match dict.get_name("Type") {
            Some("ObjStm") => {},
            other => return Err(invalid(format!("/Type is {:?}, expected /ObjStm", other))),
        }
        let count = dict
            .get_integer("N")
            .ok_or_else(|| invalid("missing /N".to_string()))?;
        let first = dict
            .get_integer("First")
            .ok_or_else(|| invalid("missing /First".to_string()))?;
        if !(0..=MAX_OBJECTS).contains(&count) {
            return Err(Error::ValueOutOfRange(format!("object stream {} /N {}", reference, count)));
        }
        let first = usize::try_from(first).map_err(|_| invalid(format!("negative /First {}", first)))?;

        let raw = container
            .stream_data()
            .ok_or_else(|| invalid("payload is not loaded".to_string()))?;
        let data = decode_stream_dict(dict, raw, max_decompressed_size)?;
        if data.len() < first {
            return Err(invalid(format!(
                "decoded length {} is shorter than /First {}",
                data.len(),
                first
            )));
        }

        let entries = read_header(&data[..first], count as usize).map_err(invalid)?;
        log::debug!("Object stream {} holds {} objects", reference, entries.len());
        Ok(Self {
            reference,
            data,
            first,
            entries,
        })
    }

    pub fn reference(&self) -> Reference {
        self.reference
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Object numbers in header order.
    pub fn object_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|&(number, _)| number)
    }

    /// Header position of `object_number`. `hint` is the index recorded in the
    /// XRef entry and is tried first.
    pub fn position_of(&self, object_number: u32, hint: Option<u32>) -> Option<usize> {
        if let Some(i) = hint.map(|h| h as usize) {
            if self.entries.get(i).is_some_and(|&(n, _)| n == object_number) {
                return Some(i);
            }
        }
        self.entries.iter().position(|&(n, _)| n == object_number)
    }

    /// Parse the object at header position `index`.
    pub fn object_at(&self, index: usize) -> Result<(u32, Object)> {
        let &(number, relative) = self.entries.get(index).ok_or_else(|| {
            Error::InvalidStream(format!("object stream {} has no entry {}", self.reference, index))
        })?;
        let start = self.first + relative;
        let bytes = self.data.get(start..).filter(|b| !b.is_empty()).ok_or_else(|| {
            Error::InvalidStream(format!(
                "object {} at offset {} lies past the end of object stream {}",
                number, relative, self.reference
            ))
        })?;
        match parse_object(bytes) {
            Ok((_, value)) => Ok((number, value)),
            Err(e) => Err(Error::NoObject {
                offset: relative as u64,
                reason: format!("object {} in object stream {}: {}", number, self.reference, e),
            }),
        }
    }
}

/// `count` pairs of integers: object number and offset relative to `/First`.
fn read_header(mut input: &[u8], count: usize) -> std::result::Result<Vec<(u32, usize)>, String> {
    let mut next_integer = |what: &str, pair: usize| -> std::result::Result<i64, String> {
        match lexer::token(input) {
            Ok((rest, Token::Integer(n))) => {
                input = rest;
                Ok(n)
            },
            _ => Err(format!("header pair {} has no {}", pair, what)),
        }
    };

    let mut entries = Vec::with_capacity(count.min(4096));
    for pair in 0..count {
        let number = next_integer("object number", pair)?;
        let offset = next_integer("offset", pair)?;
        let number = u32::try_from(number).map_err(|_| format!("object number {} out of range", number))?;
        let offset = usize::try_from(offset).map_err(|_| format!("negative offset {}", offset))?;
        entries.push((number, offset));
    }
    Ok(entries)
}
