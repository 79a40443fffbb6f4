//! Windowed tokenizer over a seekable reader.
//!
//! The PDF is never read whole. Each call reads a window starting at the
//! reader's position into the tokenizer's own scratch buffer, runs a nom
//! combinator over it and seeks the reader to just past what was consumed.
//! When the parse fails or ends too close to the window edge and the file has
//! more bytes, the window doubles and the parse is retried.
//!
//! Every component that reads the file owns its own [`Tokenizer`]; there is no
//! shared buffer.

use crate::error::{Error, Result};
use crate::lexer::{self, Token};
use crate::object::{Object, Reference};
use crate::parser;
use nom::IResult;
use std::io::{Read, Seek, SeekFrom};

/// First window read for each token or object.
const INITIAL_WINDOW: usize = 4096;

/// A parse ending closer than this to the window edge is retried with a
/// larger window, since a token (or the `G R` of a reference) may continue.
const LOOKAHEAD: usize = 32;

/// Chunk size used by forward keyword scans.
const SCAN_CHUNK: usize = 64 * 1024;

/// Seekable byte source the engine reads from.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Outcome of one windowed parse.
enum Scan<T> {
    Parsed(T),
    Invalid,
    Eof,
}

/// Token reader with an explicit scratch buffer.
#[derive(Debug, Default)]
pub struct Tokenizer {
    buffer: Vec<u8>,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read up to `len` bytes at `start` into the buffer. True when the file ended.
    fn fill<R: Read + Seek + ?Sized>(&mut self, reader: &mut R, start: u64, len: usize) -> Result<bool> {
        reader.seek(SeekFrom::Start(start))?;
        self.buffer.clear();
        (&mut *reader).take(len as u64).read_to_end(&mut self.buffer)?;
        Ok(self.buffer.len() < len)
    }

    /// Run `parse` at the reader position, growing the window as needed.
    /// On success the reader sits after the consumed bytes; otherwise it is
    /// left where it started.
    fn scan<R, T, F>(&mut self, reader: &mut R, parse: F) -> Result<Scan<T>>
    where
        R: Read + Seek + ?Sized,
        F: Fn(&[u8]) -> IResult<&[u8], T>,
    {
        let start = reader.stream_position()?;
        let mut window = INITIAL_WINDOW;
        loop {
            let at_eof = self.fill(reader, start, window)?;
            let outcome = match parse(&self.buffer) {
                Ok((rest, value)) if at_eof || rest.len() >= LOOKAHEAD => {
                    let consumed = (self.buffer.len() - rest.len()) as u64;
                    reader.seek(SeekFrom::Start(start + consumed))?;
                    return Ok(Scan::Parsed(value));
                },
                Ok(_) => None,
                Err(err) => {
                    let near_edge = match &err {
                        nom::Err::Error(e) | nom::Err::Failure(e) => e.input.len() < LOOKAHEAD,
                        nom::Err::Incomplete(_) => true,
                    };
                    if near_edge && !at_eof {
                        None
                    } else {
                        let only_ws =
                            matches!(lexer::skip_ws(&self.buffer), Ok((rest, _)) if rest.is_empty());
                        Some(if at_eof && only_ws { Scan::Eof } else { Scan::Invalid })
                    }
                },
            };
            if let Some(result) = outcome {
                reader.seek(SeekFrom::Start(start))?;
                return Ok(result);
            }
            window = window.saturating_mul(2);
        }
    }

    /// Read the next token. `Ok(None)` at end of file or when the bytes at the
    /// reader position do not form a token.
    pub fn read_next_token<R: Read + Seek + ?Sized>(&mut self, reader: &mut R) -> Result<Option<Token<'_>>> {
        match self.scan(reader, |i| lexer::token(i).map(|(rest, _)| (rest, ())))? {
            Scan::Parsed(()) => {},
            Scan::Invalid | Scan::Eof => return Ok(None),
        }
        // The window that produced the token is still in the buffer.
        match lexer::token(&self.buffer) {
            Ok((_, tok)) => Ok(Some(tok)),
            Err(_) => Ok(None),
        }
    }

    /// Read an integer token.
    ///
    /// Fails with [`Error::UnexpectedEof`] at end of file and
    /// [`Error::NoNumber`] on any other token; the reader is not moved on failure.
    pub fn read_next_number<R: Read + Seek + ?Sized>(&mut self, reader: &mut R) -> Result<i64> {
        let start = reader.stream_position()?;
        let parsed = self.scan(reader, |i| match lexer::token(i) {
            Ok((rest, Token::Integer(n))) => Ok((rest, Some(n))),
            Ok((rest, _)) => Ok((rest, None)),
            Err(e) => Err(e),
        })?;
        match parsed {
            Scan::Parsed(Some(n)) => Ok(n),
            Scan::Parsed(None) | Scan::Invalid => {
                reader.seek(SeekFrom::Start(start))?;
                Err(Error::NoNumber { offset: start })
            },
            Scan::Eof => Err(Error::UnexpectedEof),
        }
    }

    /// Consume the next token if it is the keyword `word`; otherwise leave the
    /// reader untouched.
    pub fn try_read_keyword<R: Read + Seek + ?Sized>(&mut self, reader: &mut R, word: &[u8]) -> Result<bool> {
        let start = reader.stream_position()?;
        let matched = matches!(self.read_next_token(reader)?, Some(tok) if tok.is_keyword(word));
        if !matched {
            reader.seek(SeekFrom::Start(start))?;
        }
        Ok(matched)
    }

    /// True when the next token is `word`. Never moves the reader.
    pub fn is_next_keyword<R: Read + Seek + ?Sized>(&mut self, reader: &mut R, word: &[u8]) -> Result<bool> {
        let start = reader.stream_position()?;
        let matched = self.try_read_keyword(reader, word)?;
        reader.seek(SeekFrom::Start(start))?;
        Ok(matched)
    }

    /// Move the reader past whitespace and comments.
    pub fn skip_whitespace<R: Read + Seek + ?Sized>(&mut self, reader: &mut R) -> Result<()> {
        self.scan(reader, lexer::skip_ws)?;
        Ok(())
    }

    /// Parse one direct object at the reader position.
    pub fn read_object<R: Read + Seek + ?Sized>(&mut self, reader: &mut R) -> Result<Object> {
        let offset = reader.stream_position()?;
        match self.scan(reader, parser::parse_object)? {
            Scan::Parsed(obj) => Ok(obj),
            Scan::Invalid => Err(Error::NoObject {
                offset,
                reason: "no PDF value at this position".to_string(),
            }),
            Scan::Eof => Err(Error::UnexpectedEof),
        }
    }

    /// Read an `N G obj` header.
    pub fn read_object_header<R: Read + Seek + ?Sized>(&mut self, reader: &mut R) -> Result<Reference> {
        let offset = reader.stream_position()?;
        let header_error = |reason: &str| Error::NoObject {
            offset,
            reason: reason.to_string(),
        };
        let number = self.read_next_number(reader).map_err(|_| header_error("missing object number"))?;
        let generation = self.read_next_number(reader).map_err(|_| header_error("missing generation"))?;
        if !self.try_read_keyword(reader, b"obj")? {
            return Err(header_error("missing 'obj' keyword"));
        }
        let object_number =
            u32::try_from(number).map_err(|_| header_error("object number out of range"))?;
        let generation = u16::try_from(generation).map_err(|_| header_error("generation out of range"))?;
        Ok(Reference::new(object_number, generation))
    }

    /// After a dictionary: consume `stream` and its EOL and return the offset of
    /// the first payload byte, or `None` when no `stream` keyword follows.
    ///
    /// The keyword should be followed by CR LF or LF; a lone CR is accepted too.
    pub fn read_stream_start<R: Read + Seek + ?Sized>(&mut self, reader: &mut R) -> Result<Option<u64>> {
        if !self.try_read_keyword(reader, b"stream")? {
            return Ok(None);
        }
        let after_keyword = reader.stream_position()?;
        let mut eol = [0u8; 2];
        let n = read_up_to(reader, &mut eol)?;
        let skip = match &eol[..n] {
            [b'\r', b'\n'] => 2,
            [b'\n', ..] | [b'\r', ..] => 1,
            _ => 0,
        };
        let payload = after_keyword + skip;
        reader.seek(SeekFrom::Start(payload))?;
        Ok(Some(payload))
    }

    /// Search backward for the last occurrence of `token` inside
    /// `[search_end - range, search_end)`. Returns its absolute offset; the
    /// reader position is restored either way.
    pub fn find_token_backward<R: Read + Seek + ?Sized>(
        &mut self,
        reader: &mut R,
        token: &[u8],
        range: u64,
        search_end: u64,
    ) -> Result<Option<u64>> {
        let saved = reader.stream_position()?;
        let start = search_end.saturating_sub(range);
        self.fill(reader, start, (search_end - start) as usize)?;
        reader.seek(SeekFrom::Start(saved))?;
        Ok(index_last(&self.buffer, token).map(|pos| start + pos as u64))
    }

    /// Search forward from `from` for `token`, reading the file in chunks.
    /// Returns its absolute offset; the reader position is restored.
    pub fn find_token_forward<R: Read + Seek + ?Sized>(
        &mut self,
        reader: &mut R,
        token: &[u8],
        from: u64,
    ) -> Result<Option<u64>> {
        let saved = reader.stream_position()?;
        let overlap = token.len().saturating_sub(1) as u64;
        let mut start = from;
        let found = loop {
            let at_eof = self.fill(reader, start, SCAN_CHUNK)?;
            if let Some(pos) = index_first(&self.buffer, token) {
                break Some(start + pos as u64);
            }
            if at_eof || self.buffer.len() as u64 <= overlap {
                break None;
            }
            start += self.buffer.len() as u64 - overlap;
        };
        reader.seek(SeekFrom::Start(saved))?;
        Ok(found)
    }

    /// Length of a stream payload measured up to the next `endstream`, minus
    /// the EOL preceding the keyword. `None` when no `endstream` follows.
    pub fn measure_stream<R: Read + Seek + ?Sized>(&mut self, reader: &mut R, payload_offset: u64) -> Result<Option<u64>> {
        let Some(end) = self.find_token_forward(reader, b"endstream", payload_offset)? else {
            return Ok(None);
        };
        let saved = reader.stream_position()?;
        let mut length = end - payload_offset;
        reader.seek(SeekFrom::Start(end.saturating_sub(2).max(payload_offset)))?;
        let mut tail = [0u8; 2];
        let n = read_up_to(reader, &mut tail)?;
        reader.seek(SeekFrom::Start(saved))?;
        match &tail[..n] {
            [b'\r', b'\n'] => length = length.saturating_sub(2),
            [_, b'\n'] | [_, b'\r'] | [b'\n'] | [b'\r'] => length = length.saturating_sub(1),
            _ => {},
        }
        Ok(Some(length))
    }
}

/// Fill as much of `buf` as the reader can provide.
pub(crate) fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Position of the last occurrence of `needle` in `haystack`.
///
/// ```
/// # use pdf_xref::tokenizer::index_last;
/// assert_eq!(index_last(b"startxref 1 startxre", b"startxref"), Some(0));
/// assert_eq!(index_last(b"abc", b"xref"), None);
/// ```
pub fn index_last(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Position of the first occurrence of `needle` in `haystack`.
pub fn index_first(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_tokens_in_sequence() {
        let mut reader = Cursor::new(b"xref\n0 6\ntrailer".to_vec());
        let mut tok = Tokenizer::new();
        assert!(tok.try_read_keyword(&mut reader, b"xref").unwrap());
        assert_eq!(tok.read_next_number(&mut reader).unwrap(), 0);
        assert_eq!(tok.read_next_number(&mut reader).unwrap(), 6);
        assert!(!tok.try_read_keyword(&mut reader, b"xref").unwrap());
        assert!(tok.is_next_keyword(&mut reader, b"trailer").unwrap());
        assert!(tok.try_read_keyword(&mut reader, b"trailer").unwrap());
        assert!(tok.read_next_token(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_read_next_number_failures_leave_position() {
        let mut reader = Cursor::new(b"  trailer".to_vec());
        let mut tok = Tokenizer::new();
        match tok.read_next_number(&mut reader) {
            Err(Error::NoNumber { offset }) => assert_eq!(offset, 0),
            other => panic!("expected NoNumber, got {:?}", other),
        }
        assert_eq!(reader.position(), 0);

        let mut reader = Cursor::new(b"   \n".to_vec());
        assert!(matches!(tok.read_next_number(&mut reader), Err(Error::UnexpectedEof)));
    }

    #[test]
    fn test_reference_across_window_edge() {
        // The "0 R" of the reference lands just past the first window.
        let mut data = vec![b' '; INITIAL_WINDOW - 4];
        data.extend_from_slice(b"12 0 R ");
        let mut reader = Cursor::new(data);
        let mut tok = Tokenizer::new();
        let obj = tok.read_object(&mut reader).unwrap();
        assert_eq!(obj.as_reference(), Some(Reference::new(12, 0)));
    }

    #[test]
    fn test_large_dictionary_grows_window() {
        let mut body = String::from("<< ");
        for i in 0..2000 {
            body.push_str(&format!("/K{} {} ", i, i));
        }
        body.push_str(">> trailing");
        let mut reader = Cursor::new(body.into_bytes());
        let mut tok = Tokenizer::new();
        let obj = tok.read_object(&mut reader).unwrap();
        assert_eq!(obj.as_dict().unwrap().len(), 2000);
        assert!(tok.try_read_keyword(&mut reader, b"trailing").unwrap());
    }

    #[test]
    fn test_read_object_header_and_stream_start() {
        let mut reader = Cursor::new(b"7 0 obj\n<< /Length 3 >>\nstream\r\nabc\nendstream".to_vec());
        let mut tok = Tokenizer::new();
        assert_eq!(tok.read_object_header(&mut reader).unwrap(), Reference::new(7, 0));
        let dict = tok.read_object(&mut reader).unwrap();
        assert_eq!(dict.as_dict().unwrap().get_integer("Length"), Some(3));
        let payload = tok.read_stream_start(&mut reader).unwrap().unwrap();
        assert_eq!(payload, 32);
        let mut data = [0u8; 3];
        reader.read_exact(&mut data).unwrap();
        assert_eq!(&data, b"abc");
    }

    #[test]
    fn test_invalid_header() {
        let mut reader = Cursor::new(b"7 0 xbj".to_vec());
        let mut tok = Tokenizer::new();
        assert!(matches!(tok.read_object_header(&mut reader), Err(Error::NoObject { .. })));
    }

    #[test]
    fn test_find_token_backward() {
        let data = b"%PDF-1.4\nstartxref\n123\n%%EOF\nstartxre".to_vec();
        let len = data.len() as u64;
        let mut reader = Cursor::new(data);
        reader.set_position(5);
        let mut tok = Tokenizer::new();
        let found = tok.find_token_backward(&mut reader, b"startxref", 512, len).unwrap();
        assert_eq!(found, Some(9));
        assert_eq!(reader.position(), 5);
        assert_eq!(tok.find_token_backward(&mut reader, b"trailer", 512, len).unwrap(), None);
    }

    #[test]
    fn test_find_token_forward_across_chunks() {
        let mut data = vec![b'x'; SCAN_CHUNK - 3];
        data.extend_from_slice(b"endstream");
        let mut reader = Cursor::new(data);
        let mut tok = Tokenizer::new();
        let found = tok.find_token_forward(&mut reader, b"endstream", 0).unwrap();
        assert_eq!(found, Some((SCAN_CHUNK - 3) as u64));
    }

    #[test]
    fn test_index_last_finds_last_occurrence() {
        assert_eq!(index_last(b"xref xref xre xr", b"xref"), Some(5));
        assert_eq!(index_last(b"", b"xref"), None);
        assert_eq!(index_last(b"abc", b""), None);
    }
}
