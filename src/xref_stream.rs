//! Cross-reference streams (ISO 32000-1, 7.5.8).
//!
//! An XRef stream is an indirect object whose dictionary doubles as the
//! section trailer and whose decoded payload is a run of fixed-width
//! big-endian records described by `/W` and `/Index`.

use byteorder::{BigEndian, ByteOrder};
use std::io::{Read, Seek, SeekFrom};

use crate::decoders;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};
use crate::tokenizer::{read_up_to, Tokenizer};
use crate::xref::{XRefEntry, MAX_OBJECT_NUMBER};

/// Largest field width in `/W`.
const MAX_FIELD_WIDTH: usize = 8;

/// One parsed XRef stream.
#[derive(Debug)]
pub struct XRefStreamSection {
    /// The stream dictionary; it carries the trailer keys and `/Prev`.
    pub dictionary: Dictionary,
    /// Records in `/Index` order.
    pub entries: Vec<(u32, XRefEntry)>,
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidXRefStream(msg.into())
}

/// Parse the XRef stream object starting at `offset`.
pub fn read_xref_stream<R: Read + Seek + ?Sized>(
    reader: &mut R,
    tokenizer: &mut Tokenizer,
    offset: u64,
    strict: bool,
    max_decompressed_size: usize,
) -> Result<XRefStreamSection> {
    reader.seek(SeekFrom::Start(offset))?;
    let reference = tokenizer.read_object_header(reader)?;
    let dictionary = match tokenizer.read_object(reader)? {
        Object::Dictionary(dict) => dict,
        other => return Err(invalid(format!("object {} is a {}, not a stream", reference, other.kind()))),
    };

    match dictionary.get_name("Type") {
        Some("XRef") => {},
        other => {
            return Err(Error::NoXRef(format!(
                "object {} at offset {} has /Type {:?}, expected /XRef",
                reference, offset, other
            )))
        },
    }

    let payload_offset = tokenizer
        .read_stream_start(reader)?
        .ok_or_else(|| invalid(format!("object {} has no stream keyword", reference)))?;
    let length = payload_length(reader, tokenizer, &dictionary, payload_offset, strict)?;

    reader.seek(SeekFrom::Start(payload_offset))?;
    let mut raw = vec![0u8; length];
    let read = read_up_to(reader, &mut raw)?;
    if read < length {
        return Err(invalid(format!(
            "payload of object {} truncated: {} of {} bytes",
            reference, read, length
        )));
    }

    let data = decoders::decode_stream_dict(&dictionary, &raw, max_decompressed_size)
        .map_err(|e| invalid(format!("cannot decode object {}: {}", reference, e)))?;

    let layout = RecordLayout::from_dict(&dictionary)?;
    let entries = layout.decode(&data, strict)?;
    log::debug!(
        "XRef stream {} at offset {}: {} entries, /W {:?}",
        reference,
        offset,
        entries.len(),
        layout.widths
    );

    Ok(XRefStreamSection { dictionary, entries })
}

/// A direct `/Length` is trusted when it stays inside the file and
/// `endstream` follows it. Lenient parsing measures up to `endstream`
/// otherwise.
fn payload_length<R: Read + Seek + ?Sized>(
    reader: &mut R,
    tokenizer: &mut Tokenizer,
    dictionary: &Dictionary,
    payload_offset: u64,
    strict: bool,
) -> Result<usize> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    let declared = dictionary.get_integer("Length");
    if let Some(length) = declared.and_then(|l| u64::try_from(l).ok()) {
        if payload_offset.saturating_add(length) <= file_size {
            reader.seek(SeekFrom::Start(payload_offset + length))?;
            if tokenizer.try_read_keyword(reader, b"endstream")? {
                return usize::try_from(length).map_err(|_| invalid(format!("/Length {} out of range", length)));
            }
        }
    }
    if strict {
        return Err(invalid(match declared {
            Some(length) => format!("/Length {} is not followed by endstream", length),
            None => "/Length is not a direct integer".to_string(),
        }));
    }
    let length = tokenizer
        .measure_stream(reader, payload_offset)?
        .ok_or_else(|| invalid("no endstream after XRef stream payload"))?;
    log::warn!("XRef stream /Length {:?} unusable; measured {} bytes", declared, length);
    usize::try_from(length).map_err(|_| invalid(format!("measured length {} out of range", length)))
}

/// `/W` and `/Index` of one stream.
#[derive(Debug)]
struct RecordLayout {
    widths: [usize; 3],
    subsections: Vec<(u32, u32)>,
}

impl RecordLayout {
    fn from_dict(dict: &Dictionary) -> Result<Self> {
        let size = dict
            .get_integer("Size")
            .ok_or_else(|| invalid("missing /Size"))?;
        let size = u32::try_from(size)
            .ok()
            .filter(|&s| s > 0)
            .ok_or_else(|| invalid(format!("invalid /Size {}", size)))?;

        let w = dict
            .get("W")
            .and_then(Object::as_array)
            .ok_or_else(|| invalid("missing /W"))?;
        if w.len() != 3 {
            return Err(invalid(format!("/W has {} entries", w.len())));
        }
        let mut widths = [0usize; 3];
        for (slot, value) in widths.iter_mut().zip(w.iter()) {
            *slot = value
                .as_integer()
                .and_then(|v| usize::try_from(v).ok())
                .filter(|&v| v <= MAX_FIELD_WIDTH)
                .ok_or_else(|| invalid(format!("invalid /W entry {:?}", value)))?;
        }
        if widths.iter().sum::<usize>() == 0 {
            return Err(invalid("/W fields are all zero"));
        }

        let subsections = match dict.get("Index") {
            None => vec![(0, size)],
            Some(index) => {
                let index = index.as_array().ok_or_else(|| invalid("/Index is not an array"))?;
                if index.len() % 2 != 0 {
                    return Err(invalid("/Index has odd length"));
                }
                let numbers = index
                    .iter()
                    .map(|v| {
                        v.as_integer()
                            .and_then(|n| u32::try_from(n).ok())
                            .ok_or_else(|| invalid(format!("invalid /Index entry {:?}", v)))
                    })
                    .collect::<Result<Vec<u32>>>()?;
                numbers.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect()
            },
        };

        Ok(Self { widths, subsections })
    }

    fn record_len(&self) -> usize {
        self.widths.iter().sum()
    }

    fn decode(&self, data: &[u8], strict: bool) -> Result<Vec<(u32, XRefEntry)>> {
        let record_len = self.record_len();
        let [w0, w1, w2] = self.widths;
        let mut records = data.chunks_exact(record_len);
        let mut entries = Vec::new();

        for &(first, count) in &self.subsections {
            let last = u64::from(first) + u64::from(count);
            if last > u64::from(MAX_OBJECT_NUMBER) + 1 {
                return Err(Error::ValueOutOfRange(format!(
                    "XRef stream subsection {} {} exceeds the object number limit",
                    first, count
                )));
            }
            for number in first..first + count {
                let record = records.next().ok_or_else(|| {
                    invalid(format!(
                        "payload of {} bytes ends before object {}",
                        data.len(),
                        number
                    ))
                })?;
                let kind = if w0 == 0 { 1 } else { field(&record[..w0]) };
                let second = field(&record[w0..w0 + w1]);
                let third = field(&record[w0 + w1..w0 + w1 + w2]);

                let entry = match kind {
                    0 => XRefEntry::Free {
                        next_free: u32::try_from(second).unwrap_or(0),
                        generation: clamp_generation(third),
                    },
                    1 => XRefEntry::InUse {
                        offset: second,
                        generation: clamp_generation(third),
                    },
                    2 => XRefEntry::Compressed {
                        stream_object: u32::try_from(second)
                            .map_err(|_| invalid(format!("object stream number {} out of range", second)))?,
                        index: u32::try_from(third)
                            .map_err(|_| invalid(format!("object stream index {} out of range", third)))?,
                    },
                    other if strict => return Err(Error::InvalidXRefType(other)),
                    other => {
                        log::warn!("Skipping XRef stream record of unknown type {} for object {}", other, number);
                        continue;
                    },
                };
                entries.push((number, entry));
            }
        }
        Ok(entries)
    }
}

/// Big-endian unsigned field; an empty field reads as 0.
fn field(bytes: &[u8]) -> u64 {
    if bytes.is_empty() {
        0
    } else {
        BigEndian::read_uint(bytes, bytes.len())
    }
}

fn clamp_generation(value: u64) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}
