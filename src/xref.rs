//! Cross-reference resolution.
//!
//! The resolver locates the newest XRef section through `startxref`, then walks
//! the chain of incremental updates backwards through `/XRefStm` and `/Prev`.
//! Sections may be classic tables (PDF 1.0+) or XRef streams (PDF 1.5+, read
//! by [`crate::xref_stream`]). Newer sections are read first, so the first
//! entry recorded for an object number is authoritative and later (older)
//! entries for it are ignored. The same rule applies to the trailer keys.
//!
//! When the chain cannot be read and the parser is lenient, the table is
//! rebuilt by [`crate::xref_reconstruction`].

use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::lexer;
use crate::object::{Dictionary, Object};
use crate::parser_config::ParserOptions;
use crate::tokenizer::{read_up_to, Tokenizer};
use crate::version::PdfVersion;
use crate::xref_reconstruction;
use crate::xref_stream;

/// Highest object number a section may declare.
pub const MAX_OBJECT_NUMBER: u32 = 8_388_607;

/// `startxref` must appear within this many bytes before `%%EOF`.
const STARTXREF_WINDOW: u64 = 512;

/// Window searched for a standalone `xref` when `startxref` points past EOF.
const RECOVERY_WINDOW: u64 = 2048;

/// Subsections allowed in one file before the table is considered unterminated.
const MAX_SUBSECTIONS: usize = 512;

/// Width of a classic table entry.
const ENTRY_LEN: usize = 20;

/// Trailer keys merged across sections.
pub(crate) const TRAILER_KEYS: [&str; 5] = ["Size", "Root", "Encrypt", "Info", "ID"];

/// Location of one object number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum XRefEntry {
    Free { next_free: u32, generation: u16 },
    InUse { offset: u64, generation: u16 },
    Compressed { stream_object: u32, index: u32 },
}

impl XRefEntry {
    pub fn generation(&self) -> u16 {
        match *self {
            XRefEntry::Free { generation, .. } | XRefEntry::InUse { generation, .. } => generation,
            XRefEntry::Compressed { .. } => 0,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, XRefEntry::Free { .. })
    }
}

/// Entries indexed by object number. `None` means no section declared the number.
#[derive(Debug, Clone, Default)]
pub struct XRefTable {
    entries: Vec<Option<XRefEntry>>,
}

impl XRefTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots, i.e. the highest declared object number plus one.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of object numbers some section declared.
    pub fn parsed_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn get(&self, object_number: u32) -> Option<&XRefEntry> {
        self.entries.get(object_number as usize).and_then(Option::as_ref)
    }

    /// Record `entry` unless a newer section already declared the number.
    /// Returns whether the entry was stored.
    pub fn set_if_absent(&mut self, object_number: u32, entry: XRefEntry) -> bool {
        let index = object_number as usize;
        if index >= self.entries.len() {
            self.entries.resize(index + 1, None);
        }
        match &mut self.entries[index] {
            Some(_) => false,
            slot => {
                *slot = Some(entry);
                true
            },
        }
    }

    /// Grow to at least `len` slots.
    pub fn reserve_slots(&mut self, len: usize) {
        if len > self.entries.len() {
            self.entries.resize(len, None);
        }
    }

    /// Declared entries in object number order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &XRefEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(n, e)| e.as_ref().map(|e| (n as u32, e)))
    }
}

/// Everything the resolver learned about the file.
#[derive(Debug, Clone)]
pub struct XRefResolution {
    pub table: XRefTable,
    pub trailer: Dictionary,
    /// Offset of the newest section
    pub xref_offset: u64,
    pub has_xref_stream: bool,
    pub incremental_updates: usize,
    /// True when the table was rebuilt by scanning object headers
    pub reconstructed: bool,
}

/// How a queued section is to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    /// Classic table or XRef stream, decided by the first token
    Detect,
    /// Named by a hybrid file's `/XRefStm`
    Stream,
}

/// Walks the XRef chain of one file.
pub struct XRefResolver<'r, R: Read + Seek + ?Sized> {
    reader: &'r mut R,
    tokenizer: Tokenizer,
    strict: bool,
    max_decompressed_size: usize,
    version: PdfVersion,
    file_size: u64,
    eof_offset: u64,
    startxref_offset: u64,
    visited: HashSet<u64>,
    table: XRefTable,
    trailer: Dictionary,
    xref_offset: u64,
    has_xref_stream: bool,
    incremental_updates: usize,
    subsections: usize,
}

impl<'r, R: Read + Seek + ?Sized> XRefResolver<'r, R> {
    /// `eof_offset` is the position of the `%%EOF` marker the chain is
    /// searched back from.
    pub fn new(
        reader: &'r mut R,
        version: PdfVersion,
        file_size: u64,
        eof_offset: u64,
        options: &ParserOptions,
    ) -> Self {
        Self {
            reader,
            tokenizer: Tokenizer::new(),
            strict: options.strict,
            max_decompressed_size: options.max_decompressed_size,
            version,
            file_size,
            eof_offset,
            startxref_offset: eof_offset,
            visited: HashSet::new(),
            table: XRefTable::new(),
            trailer: Dictionary::new(),
            xref_offset: 0,
            has_xref_stream: false,
            incremental_updates: 0,
            subsections: 0,
        }
    }

    /// Read the whole chain, rebuilding the table from object headers when the
    /// chain is unreadable and the parser is lenient.
    pub fn resolve(mut self) -> Result<XRefResolution> {
        match self.read_chain() {
            Ok(()) => Ok(self.finish(false)),
            Err(err) if !self.strict && err.is_recoverable_xref_failure() => {
                log::info!("XRef chain unreadable ({}); reconstructing from object headers", err);
                let rebuilt = xref_reconstruction::reconstruct(self.reader, self.file_size)?;
                self.table = rebuilt.table;
                self.trailer = rebuilt.trailer;
                self.has_xref_stream = false;
                Ok(self.finish(true))
            },
            Err(err) => Err(err),
        }
    }

    fn finish(self, reconstructed: bool) -> XRefResolution {
        XRefResolution {
            table: self.table,
            trailer: self.trailer,
            xref_offset: self.xref_offset,
            has_xref_stream: self.has_xref_stream,
            incremental_updates: self.incremental_updates,
            reconstructed,
        }
    }

    fn read_chain(&mut self) -> Result<()> {
        self.xref_offset = self.locate_chain()?;
        let mut pending = vec![(self.xref_offset, SectionKind::Detect)];
        while let Some((offset, kind)) = pending.pop() {
            let links = self.read_section(offset, kind)?;
            // /XRefStm is read before /Prev
            if let Some(prev) = links.prev {
                self.incremental_updates += 1;
                pending.push((prev, SectionKind::Detect));
            }
            if let Some(stream) = links.xref_stm {
                self.incremental_updates += 1;
                pending.push((stream, SectionKind::Stream));
            }
        }
        Ok(())
    }

    /// Find `startxref` (or the `startref` misspelling when lenient) before
    /// `%%EOF` and return the offset it names.
    fn locate_chain(&mut self) -> Result<u64> {
        let mut keywords: &[&[u8]] = &[&b"startxref"[..], &b"startref"[..]];
        if self.strict {
            keywords = &keywords[..1];
        }
        for &keyword in keywords {
            let found =
                self.tokenizer
                    .find_token_backward(self.reader, keyword, STARTXREF_WINDOW, self.eof_offset)?;
            let Some(position) = found else { continue };
            if keyword != &b"startxref"[..] {
                log::warn!("Found misspelled 'startref' at offset {}", position);
            }
            self.startxref_offset = position;
            self.reader.seek(SeekFrom::Start(position))?;
            if !self.tokenizer.try_read_keyword(self.reader, keyword)? {
                continue;
            }
            let offset = self.tokenizer.read_next_number(self.reader)?;
            return u64::try_from(offset)
                .map_err(|_| Error::InvalidXRef(format!("negative startxref offset {}", offset)));
        }
        Err(Error::NoXRef(format!(
            "no startxref within {} bytes before offset {}",
            STARTXREF_WINDOW, self.eof_offset
        )))
    }

    fn read_section(&mut self, offset: u64, kind: SectionKind) -> Result<SectionLinks> {
        if !self.visited.insert(offset) {
            return Err(Error::InvalidXRef(format!(
                "cycle in xref structure: offset {} already visited",
                offset
            )));
        }

        let offset = if offset >= self.file_size {
            self.recover_past_eof(offset)?
        } else {
            offset
        };
        log::debug!("Reading XRef section at offset {}", offset);

        self.reader.seek(SeekFrom::Start(offset))?;
        let is_table = self.tokenizer.try_read_keyword(self.reader, b"xref")?;
        if is_table && kind == SectionKind::Detect {
            return self.read_table();
        }
        if kind == SectionKind::Detect && !self.version.allows_xref_streams() {
            return Err(Error::NoXRef(format!(
                "no 'xref' keyword at offset {} and PDF {} predates XRef streams",
                offset, self.version
            )));
        }
        self.has_xref_stream = true;
        self.read_stream(offset)
    }

    /// `startxref` names an offset past the end of the file. Lenient parsing
    /// adopts the last standalone `xref` keyword before `startxref`.
    fn recover_past_eof(&mut self, offset: u64) -> Result<u64> {
        if self.strict {
            return Err(Error::InvalidXRef(format!(
                "offset {} is past the end of the file ({} bytes)",
                offset, self.file_size
            )));
        }
        let found = self.tokenizer.find_token_backward(
            self.reader,
            b"xref",
            RECOVERY_WINDOW,
            self.startxref_offset,
        )?;
        let corrected = found.ok_or_else(|| {
            Error::InvalidXRef(format!(
                "offset {} is past the end of the file and no xref keyword precedes startxref",
                offset
            ))
        })?;
        log::warn!(
            "XRef offset {} is past the end of the file; using xref keyword at {}",
            offset,
            corrected
        );
        self.xref_offset = corrected;
        Ok(corrected)
    }

    /// Classic table; the reader sits after `xref`.
    fn read_table(&mut self) -> Result<SectionLinks> {
        loop {
            if self.subsections == MAX_SUBSECTIONS {
                return Err(Error::NoEofToken);
            }
            if self.tokenizer.is_next_keyword(self.reader, b"trailer")? {
                break;
            }
            let first = match self.tokenizer.read_next_number(self.reader) {
                Ok(n) => n,
                Err(Error::NoNumber { .. }) | Err(Error::UnexpectedEof) => break,
                Err(e) => return Err(e),
            };
            let count = match self.tokenizer.read_next_number(self.reader) {
                Ok(n) => n,
                Err(Error::NoNumber { .. }) | Err(Error::UnexpectedEof) => break,
                Err(e) => return Err(e),
            };
            self.subsections += 1;
            match self.read_subsection(first, count) {
                Ok(()) => {},
                Err(Error::NoNumber { .. }) | Err(Error::UnexpectedEof) => break,
                Err(e) => return Err(e),
            }
        }

        match self.read_trailer()? {
            Some(trailer) => {
                self.merge_trailer(&trailer);
                Ok(SectionLinks::from_trailer(&trailer))
            },
            None => {
                log::warn!("{}: XRef table has no readable trailer", Error::NoTrailer);
                Ok(SectionLinks::default())
            },
        }
    }

    fn read_subsection(&mut self, first: i64, count: i64) -> Result<()> {
        if first < 0 || count < 0 {
            return Err(Error::ValueOutOfRange(format!(
                "XRef subsection {} {} has a negative bound",
                first, count
            )));
        }
        if first + count > i64::from(MAX_OBJECT_NUMBER) + 1 {
            return Err(Error::ValueOutOfRange(format!(
                "XRef subsection {} {} exceeds the object number limit",
                first, count
            )));
        }
        let mut first = first as u32;
        let count = count as u32;
        self.table.reserve_slots((first + count) as usize);
        self.tokenizer.skip_whitespace(self.reader)?;

        let mut raw = [0u8; ENTRY_LEN];
        for i in 0..count {
            let entry_start = self.reader.stream_position()?;
            let n = read_up_to(self.reader, &mut raw)?;
            if n < ENTRY_LEN {
                log::warn!("XRef subsection ends after {} of {} entries", i, count);
                return Err(Error::UnexpectedEof);
            }
            let entry = ClassicEntry::parse(&raw, entry_start)?;

            if i == 0 && first == 1 && !self.strict && entry.is_free_list_head() {
                log::warn!("XRef subsection starting at 1 holds the free list head; renumbering from 0");
                first = 0;
            }

            if !entry.eol_ok {
                if self.strict {
                    return Err(Error::InvalidXRef(format!(
                        "invalid end of line in XRef entry at offset {}",
                        entry_start
                    )));
                }
                // 19-byte entry: the last byte read belongs to the next one
                self.reader.seek(SeekFrom::Current(-1))?;
            }
            self.table.set_if_absent(first + i, entry.entry);
        }
        Ok(())
    }

    /// `trailer << ... >>`, or `None` when absent or not a dictionary.
    fn read_trailer(&mut self) -> Result<Option<Dictionary>> {
        if !self.tokenizer.try_read_keyword(self.reader, b"trailer")? {
            return Ok(None);
        }
        match self.tokenizer.read_object(self.reader) {
            Ok(Object::Dictionary(dict)) => Ok(Some(dict)),
            Ok(other) => {
                log::warn!("Trailer is a {}, not a dictionary", other.kind());
                Ok(None)
            },
            Err(Error::NoObject { .. }) | Err(Error::UnexpectedEof) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn read_stream(&mut self, offset: u64) -> Result<SectionLinks> {
        let section = xref_stream::read_xref_stream(
            self.reader,
            &mut self.tokenizer,
            offset,
            self.strict,
            self.max_decompressed_size,
        )?;
        for (number, entry) in section.entries {
            self.table.set_if_absent(number, entry);
        }
        self.merge_trailer(&section.dictionary);
        // An XRef stream carries no /XRefStm of its own
        Ok(SectionLinks {
            prev: prev_offset(&section.dictionary),
            xref_stm: None,
        })
    }

    /// First writer wins per key.
    fn merge_trailer(&mut self, section: &Dictionary) {
        for key in TRAILER_KEYS {
            if self.trailer.contains_key(key) {
                continue;
            }
            if let Some(value) = section.get(key) {
                self.trailer.set(key, value.clone());
            }
        }
    }
}

/// Chain links named by a section trailer.
#[derive(Debug, Default)]
struct SectionLinks {
    prev: Option<u64>,
    xref_stm: Option<u64>,
}

impl SectionLinks {
    fn from_trailer(trailer: &Dictionary) -> Self {
        Self {
            prev: prev_offset(trailer),
            xref_stm: trailer
                .get_integer("XRefStm")
                .and_then(|v| u64::try_from(v).ok()),
        }
    }
}

fn prev_offset(dict: &Dictionary) -> Option<u64> {
    match dict.get("Prev") {
        None => None,
        Some(value) => match value.as_integer().and_then(|v| u64::try_from(v).ok()) {
            Some(offset) => Some(offset),
            None => {
                log::warn!("Ignoring invalid /Prev {:?}", value);
                None
            },
        },
    }
}

/// One fixed-width classic entry: `oooooooooo ggggg t` plus a 2-byte EOL.
struct ClassicEntry {
    entry: XRefEntry,
    raw_head: [u8; 18],
    eol_ok: bool,
}

impl ClassicEntry {
    fn parse(raw: &[u8; ENTRY_LEN], offset: u64) -> Result<Self> {
        let number = |range: std::ops::Range<usize>| -> Result<u64> {
            let digits = std::str::from_utf8(&raw[range])
                .ok()
                .map(str::trim)
                .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()));
            digits
                .and_then(|s| s.parse().ok())
                .ok_or(Error::NoNumber { offset })
        };
        let value = number(0..10)?;
        let generation = number(11..16)?;
        let generation = u16::try_from(generation).map_err(|_| {
            Error::InvalidXRef(format!("generation {} out of range at offset {}", generation, offset))
        })?;

        let entry = match raw[17] {
            b'n' => XRefEntry::InUse { offset: value, generation },
            b'f' => XRefEntry::Free {
                next_free: u32::try_from(value).unwrap_or(0),
                generation,
            },
            other => {
                return Err(Error::InvalidXRef(format!(
                    "entry type {:?} at offset {} is neither 'n' nor 'f'",
                    other as char, offset
                )))
            },
        };

        let eol_ok = matches!(
            (raw[18], raw[19]),
            (b'\r', b'\n') | (b'\n', b'\r') | (b' ', b'\r') | (b' ', b'\n')
        );
        let mut raw_head = [0u8; 18];
        raw_head.copy_from_slice(&raw[..18]);
        Ok(Self { entry, raw_head, eol_ok })
    }

    fn is_free_list_head(&self) -> bool {
        &self.raw_head == b"0000000000 65535 f"
    }
}

/// Offset of the `%%EOF` marker.
///
/// Strict parsing requires it at the very end of the file, optionally followed
/// by one EOL; lenient parsing takes the last marker anywhere in the file.
pub fn find_eof_marker<R: Read + Seek + ?Sized>(reader: &mut R, file_size: u64, strict: bool) -> Result<u64> {
    const MARKER: &[u8] = b"%%EOF";
    const CHUNK: u64 = 1024;
    let mut tokenizer = Tokenizer::new();

    if strict {
        let tail_len = file_size.min(MARKER.len() as u64 + 2);
        let start = file_size - tail_len;
        reader.seek(SeekFrom::Start(start))?;
        let mut tail = vec![0u8; tail_len as usize];
        let n = read_up_to(reader, &mut tail)?;
        tail.truncate(n);
        let trimmed = strip_one_eol(&tail);
        return if trimmed.ends_with(MARKER) {
            Ok(start + (trimmed.len() - MARKER.len()) as u64)
        } else {
            Err(Error::NoEofToken)
        };
    }

    // Overlapping windows walking back from the end
    let mut search_end = file_size;
    while search_end > 0 {
        if let Some(pos) = tokenizer.find_token_backward(reader, MARKER, CHUNK, search_end)? {
            if pos + (MARKER.len() as u64) < file_size && !trailing_is_blank(reader, pos + MARKER.len() as u64)? {
                log::warn!("Ignoring {} bytes after %%EOF", file_size - pos - MARKER.len() as u64);
            }
            return Ok(pos);
        }
        if search_end <= CHUNK {
            break;
        }
        search_end = search_end - CHUNK + MARKER.len() as u64 - 1;
    }
    Err(Error::NoEofToken)
}

fn strip_one_eol(tail: &[u8]) -> &[u8] {
    if let Some(rest) = tail.strip_suffix(b"\r\n") {
        rest
    } else if let Some(rest) = tail.strip_suffix(b"\n").or_else(|| tail.strip_suffix(b"\r")) {
        rest
    } else {
        tail
    }
}

fn trailing_is_blank<R: Read + Seek + ?Sized>(reader: &mut R, from: u64) -> Result<bool> {
    reader.seek(SeekFrom::Start(from))?;
    let mut rest = Vec::new();
    reader.take(256).read_to_end(&mut rest)?;
    Ok(rest.iter().all(|&c| lexer::is_whitespace(c)))
}
