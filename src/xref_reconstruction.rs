//! Cross-reference reconstruction for files whose XRef chain is unreadable.
//!
//! The whole file is scanned in overlapping chunks for `N G obj` headers; a
//! later definition of a number replaces an earlier one, matching how
//! incremental updates append new revisions. Trailer dictionaries are merged
//! newest first. Without any trailer a minimal one is synthesized from the
//! last catalog object and the highest object number.
//!
//! Used only by the lenient parser.

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};

use lazy_static::lazy_static;

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, Reference};
use crate::tokenizer::{read_up_to, Tokenizer};
use crate::xref::{XRefEntry, XRefTable, MAX_OBJECT_NUMBER, TRAILER_KEYS};

lazy_static! {
    /// `N G obj` with PDF whitespace between the parts
    static ref RE_OBJ_HEADER: regex::bytes::Regex =
        regex::bytes::Regex::new(r"([0-9]{1,10})[\x00\t\n\x0C\r ]+([0-9]{1,5})[\x00\t\n\x0C\r ]+obj").unwrap();

    static ref RE_TRAILER: regex::bytes::Regex = regex::bytes::Regex::new(r"trailer[\x00\t\n\x0C\r ]*<<").unwrap();
}

/// Bytes read per scan step.
const SCAN_CHUNK: usize = 1024 * 1024;

/// Bytes shared by consecutive chunks so a header split across them is seen whole.
const CHUNK_OVERLAP: usize = 64;

/// Table and trailer recovered by scanning.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub table: XRefTable,
    pub trailer: Dictionary,
}

/// Rebuild the table of `reader` by scanning every byte of it.
///
/// Fails with [`Error::NoXRef`] when the file holds no object header at all.
pub fn reconstruct<R: Read + Seek + ?Sized>(reader: &mut R, file_size: u64) -> Result<Reconstruction> {
    log::info!("Reconstructing XRef table by scanning {} bytes", file_size);
    let scan = scan_file(reader, SCAN_CHUNK)?;
    if scan.objects.is_empty() {
        return Err(Error::NoXRef("no object headers found while scanning the file".to_string()));
    }

    let mut table = XRefTable::new();
    for (&number, &(offset, generation)) in &scan.objects {
        table.set_if_absent(number, XRefEntry::InUse { offset, generation });
    }
    log::info!("Reconstructed XRef table with {} objects", scan.objects.len());

    let mut tokenizer = Tokenizer::new();
    let mut trailer = Dictionary::new();
    for &offset in scan.trailers.iter().rev() {
        match read_trailer_at(reader, &mut tokenizer, offset) {
            Ok(section) => {
                for key in TRAILER_KEYS {
                    if !trailer.contains_key(key) {
                        if let Some(value) = section.get(key) {
                            trailer.set(key, value.clone());
                        }
                    }
                }
            },
            Err(e) => log::warn!("Skipping unreadable trailer at offset {}: {}", offset, e),
        }
    }

    if !trailer.contains_key("Root") {
        match find_last_catalog(reader, &mut tokenizer, &scan.objects) {
            Some(root) => {
                log::info!("Using {} as the document catalog", root);
                trailer.set("Root", root);
            },
            None => log::warn!("No catalog object found while reconstructing"),
        }
    }
    if !trailer.contains_key("Size") {
        let size = scan.objects.keys().next_back().map_or(0, |&n| i64::from(n) + 1);
        trailer.set("Size", size);
    }

    Ok(Reconstruction { table, trailer })
}

#[derive(Debug, Default)]
struct ScanResult {
    /// Object number to (offset, generation) of its last definition
    objects: BTreeMap<u32, (u64, u16)>,
    /// Offsets of `trailer` keywords in file order
    trailers: Vec<u64>,
}

fn scan_file<R: Read + Seek + ?Sized>(reader: &mut R, chunk_len: usize) -> Result<ScanResult> {
    let mut result = ScanResult::default();
    let mut buffer = vec![0u8; chunk_len];
    let mut base = 0u64;

    loop {
        reader.seek(SeekFrom::Start(base))?;
        let len = read_up_to(reader, &mut buffer)?;
        let chunk = &buffer[..len];
        let at_eof = len < chunk_len;

        // Each absolute position is owned by exactly one chunk: the first byte of
        // a later chunk was judged by the previous one, where it is also the
        // byte that tells whether a match starts mid-number.
        let accept_from = if base == 0 { 0 } else { 1 };
        let accept_to = if at_eof { len } else { len - CHUNK_OVERLAP + 1 };

        for caps in RE_OBJ_HEADER.captures_iter(chunk) {
            let Some(whole) = caps.get(0) else { continue };
            let start = whole.start();
            if start < accept_from || start >= accept_to {
                continue;
            }
            if start > 0 && chunk[start - 1].is_ascii_digit() {
                continue;
            }
            if !starts_object(&chunk[whole.end()..]) {
                log::debug!("Skipping false object header at offset {}", base + start as u64);
                continue;
            }
            let number = caps.get(1).and_then(|m| parse_ascii::<u32>(m.as_bytes()));
            let generation = caps.get(2).and_then(|m| parse_ascii::<u16>(m.as_bytes()));
            match (number, generation) {
                (Some(number), Some(_)) if number > MAX_OBJECT_NUMBER => {
                    log::warn!(
                        "Skipping object {} at offset {}: number exceeds {}",
                        number,
                        base + start as u64,
                        MAX_OBJECT_NUMBER
                    );
                },
                (Some(number), Some(generation)) => {
                    result.objects.insert(number, (base + start as u64, generation));
                },
                _ => log::warn!("Object header out of range at offset {}", base + start as u64),
            }
        }

        for m in RE_TRAILER.find_iter(chunk) {
            if m.start() >= accept_from && m.start() < accept_to {
                result.trailers.push(base + m.start() as u64);
            }
        }

        if at_eof {
            break;
        }
        base += (len - CHUNK_OVERLAP) as u64;
    }
    Ok(result)
}

fn parse_ascii<T: std::str::FromStr>(digits: &[u8]) -> Option<T> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// True when `rest` (the bytes after `obj`) begins like a PDF value. An
/// empty remainder at a chunk edge is given the benefit of the doubt.
fn starts_object(rest: &[u8]) -> bool {
    match rest.iter().find(|b| !b.is_ascii_whitespace()) {
        None => true,
        Some(&b) => matches!(b, b'<' | b'[' | b'(' | b'/' | b't' | b'f' | b'n' | b'-' | b'+' | b'.') || b.is_ascii_digit(),
    }
}

fn read_trailer_at<R: Read + Seek + ?Sized>(
    reader: &mut R,
    tokenizer: &mut Tokenizer,
    offset: u64,
) -> Result<Dictionary> {
    reader.seek(SeekFrom::Start(offset))?;
    if !tokenizer.try_read_keyword(reader, b"trailer")? {
        return Err(Error::NoTrailer);
    }
    match tokenizer.read_object(reader)? {
        Object::Dictionary(dict) => Ok(dict),
        other => Err(other.type_error(crate::object::ObjectKind::Dictionary)),
    }
}

fn read_object_at<R: Read + Seek + ?Sized>(reader: &mut R, tokenizer: &mut Tokenizer, offset: u64) -> Result<Object> {
    reader.seek(SeekFrom::Start(offset))?;
    tokenizer.read_object_header(reader)?;
    tokenizer.read_object(reader)
}

/// Reference of the catalog defined last in the file.
fn find_last_catalog<R: Read + Seek + ?Sized>(
    reader: &mut R,
    tokenizer: &mut Tokenizer,
    objects: &BTreeMap<u32, (u64, u16)>,
) -> Option<Reference> {
    let mut by_offset: Vec<(u64, u32, u16)> = objects
        .iter()
        .map(|(&number, &(offset, generation))| (offset, number, generation))
        .collect();
    by_offset.sort_unstable();

    for &(offset, number, generation) in by_offset.iter().rev() {
        match read_object_at(reader, tokenizer, offset) {
            Ok(Object::Dictionary(dict)) if dict.get_name("Type") == Some("Catalog") => {
                return Some(Reference::new(number, generation));
            },
            Ok(_) => {},
            Err(e) => log::debug!("Object {} at offset {} unreadable: {}", number, offset, e),
        }
    }
    None
}
