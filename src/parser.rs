//! PDF value parser.
//!
//! Builds direct [`Object`] values from lexer tokens by recursive descent.
//! Indirect object headers (`N G obj`) and stream payloads are handled by the
//! [`crate::tokenizer::Tokenizer`], which calls [`parse_object`] for the value
//! in between.
//!
//! Arrays and dictionaries cut off by the end of the input are returned with
//! what was read so far; the tokenizer only hands over a truncated window when
//! it has already reached the end of the file.

use crate::error::{Error, Result};
use crate::lexer::{token, Token};
use crate::object::{Array, Dictionary, Name, Number, Object, PdfString, Reference};
use indexmap::IndexMap;
use nom::IResult;

/// Deepest array/dictionary nesting accepted before the parse is rejected.
pub const MAX_NESTING: usize = 256;

/// Decode escape sequences in a literal string (ISO 32000-1, 7.3.4.2).
///
/// ```
/// # use pdf_xref::parser::decode_literal_string_escapes;
/// assert_eq!(decode_literal_string_escapes(b"Section \\247 71.01"), b"Section \xa7 71.01");
/// assert_eq!(decode_literal_string_escapes(b"a\\\nb"), b"ab");
/// ```
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            result.push(raw[i]);
            i += 1;
            continue;
        }
        match raw[i + 1] {
            b'n' => result.push(b'\n'),
            b'r' => result.push(b'\r'),
            b't' => result.push(b'\t'),
            b'b' => result.push(0x08),
            b'f' => result.push(0x0C),
            b'(' | b')' | b'\\' => result.push(raw[i + 1]),
            // Line continuation
            b'\n' => {},
            b'\r' => {
                if raw.get(i + 2) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let digits = raw[i + 1..]
                    .iter()
                    .take(3)
                    .take_while(|d| (b'0'..=b'7').contains(*d))
                    .count();
                let value = raw[i + 1..i + 1 + digits]
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + (d - b'0') as u32);
                result.push((value & 0xFF) as u8);
                i += 1 + digits;
                continue;
            },
            // Unknown escape: the backslash is dropped
            other => result.push(other),
        }
        i += 2;
    }

    result
}

/// Decode the digits of a hex string. Whitespace is ignored and an odd
/// trailing digit is padded with 0.
///
/// ```
/// # use pdf_xref::parser::decode_hex;
/// assert_eq!(decode_hex(b"48 65 6C6C 6F").unwrap(), b"Hello");
/// assert_eq!(decode_hex(b"901FA").unwrap(), vec![0x90, 0x1F, 0xA0]);
/// ```
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex_bytes
        .iter()
        .filter(|c| !c.is_ascii_whitespace())
        .map(|&c| match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => Err(Error::Decode(format!("invalid hex digit '{}'", c as char))),
        })
        .collect::<Result<_>>()?;

    Ok(digits
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
        .collect())
}

fn tag_error(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
}

/// Parse one direct PDF object.
///
/// ```
/// use pdf_xref::parser::parse_object;
///
/// let (_, obj) = parse_object(b"<< /Type /Page /Parent 3 0 R >>").unwrap();
/// let dict = obj.as_dict().unwrap();
/// assert_eq!(dict.get_name("Type"), Some("Page"));
/// assert_eq!(dict.get_reference("Parent").unwrap().to_string(), "3 0 R");
/// ```
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    parse_nested(input, 0)
}

fn parse_nested(input: &[u8], depth: usize) -> IResult<&[u8], Object> {
    if depth > MAX_NESTING {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::TooLarge,
        )));
    }

    let (rest, tok) = token(input)?;
    match tok {
        Token::Null => Ok((rest, Object::Null)),
        Token::True => Ok((rest, Object::Bool(true))),
        Token::False => Ok((rest, Object::Bool(false))),
        Token::Integer(number) => {
            if let Some((after, reference)) = reference_tail(rest, number) {
                return Ok((after, Object::Reference(reference)));
            }
            Ok((rest, Object::Number(Number::Integer(number))))
        },
        Token::Real(r) => Ok((rest, Object::Number(Number::Real(r)))),
        Token::LiteralString(raw) => {
            Ok((rest, Object::String(PdfString::new(decode_literal_string_escapes(raw)))))
        },
        Token::HexString(digits) => match decode_hex(digits) {
            Ok(bytes) => Ok((rest, Object::String(PdfString::hex(bytes)))),
            Err(_) => Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::HexDigit,
            ))),
        },
        Token::Name(name) => Ok((rest, Object::Name(Name::new(name)))),
        Token::ArrayStart => parse_array(rest, depth + 1),
        Token::DictStart => {
            let (rest, dict) = parse_dictionary(rest, depth + 1)?;
            Ok((rest, Object::Dictionary(dict)))
        },
        _ => Err(tag_error(input)),
    }
}

/// `G R` after an object number, when it forms a valid reference.
fn reference_tail(input: &[u8], number: i64) -> Option<(&[u8], Reference)> {
    let object_number = u32::try_from(number).ok()?;
    let (after_gen, generation) = match token(input) {
        Ok((rest, Token::Integer(g))) => (rest, u16::try_from(g).ok()?),
        _ => return None,
    };
    match token(after_gen) {
        Ok((rest, Token::R)) => Some((rest, Reference::new(object_number, generation))),
        _ => None,
    }
}

fn parse_array(input: &[u8], depth: usize) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    let mut remaining = input;

    loop {
        match token(remaining) {
            Ok((rest, Token::ArrayEnd)) => {
                return Ok((rest, Object::Array(items.into_iter().collect::<Array>())));
            },
            Ok(_) => {
                let (rest, obj) = parse_nested(remaining, depth)?;
                items.push(obj);
                remaining = rest;
            },
            Err(_) if remaining.iter().all(|&c| crate::lexer::is_whitespace(c)) => {
                // Unterminated at end of input
                return Ok((&remaining[remaining.len()..], Object::Array(items.into_iter().collect())));
            },
            Err(e) => return Err(e),
        }
    }
}

/// Parse dictionary entries up to and including `>>`.
pub(crate) fn parse_dictionary(input: &[u8], depth: usize) -> IResult<&[u8], Dictionary> {
    let mut entries: IndexMap<Name, Object> = IndexMap::new();
    let mut remaining = input;

    loop {
        match token(remaining) {
            Ok((rest, Token::DictEnd)) => return Ok((rest, entries.into_iter().collect())),
            Ok((rest, Token::Name(key))) => {
                let (rest, value) = match parse_nested(rest, depth) {
                    Ok(parsed) => parsed,
                    Err(_) if rest.iter().all(|&c| crate::lexer::is_whitespace(c)) => {
                        return Ok((&rest[rest.len()..], entries.into_iter().collect()));
                    },
                    Err(e) => return Err(e),
                };
                // Later duplicates replace earlier ones
                entries.insert(Name::new(key), value);
                remaining = rest;
            },
            Ok(_) => return Err(tag_error(remaining)),
            Err(_) if remaining.iter().all(|&c| crate::lexer::is_whitespace(c)) => {
                return Ok((&remaining[remaining.len()..], entries.into_iter().collect()));
            },
            Err(e) => return Err(e),
        }
    }
}
