//! PDF lexer.
//!
//! Low-level nom combinators recognizing PDF tokens in a byte slice.
//!
//! Token classes (ISO 32000-1:2008, Section 7.2):
//! - Numbers: integers (42, -123) and reals (3.14, -2.5, .5)
//! - Strings: literal ((Hello)) and hexadecimal (<48656C6C6F>)
//! - Names: /Type, /A#20B
//! - Delimiters: `[`, `]`, `<<`, `>>`
//! - Regular-character runs: `true`, `false`, `null`, `obj`, `endobj`,
//!   `stream`, `endstream`, `R`, and every other keyword (`xref`, `trailer`,
//!   `startxref`, the `n`/`f` markers of classic XRef entries) as [`Token::Keyword`]
//!
//! Whitespace (space, \t, \r, \n, \0, \f) and comments (% to EOL) are skipped.
//! All combinators are `complete`: a token cut off by the end of the input is an
//! error whose remaining input is empty, which lets the tokenizer grow its window.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, digit1, one_of},
    combinator::{map, opt, value},
    multi::many0,
    sequence::preceded,
    IResult,
};

/// Token types recognized by the PDF lexer.
#[derive(Debug, PartialEq, Clone)]
pub enum Token<'a> {
    /// Integer number (e.g., 42, -123)
    Integer(i64),

    /// Real number (e.g., 3.14, -2.5, .5)
    Real(f64),

    /// Literal string bytes, escape sequences not yet decoded
    LiteralString(&'a [u8]),

    /// Hexadecimal string digits, whitespace preserved
    HexString(&'a [u8]),

    /// Name with `#xx` escapes decoded
    Name(String),

    True,
    False,
    Null,
    ArrayStart,
    ArrayEnd,
    DictStart,
    DictEnd,
    ObjStart,
    ObjEnd,
    StreamStart,
    StreamEnd,
    R,

    /// Any other run of regular characters
    Keyword(&'a [u8]),
}

impl Token<'_> {
    /// True when this token is the keyword `word`.
    pub fn is_keyword(&self, word: &[u8]) -> bool {
        match self {
            Token::Keyword(k) => *k == word,
            Token::True => word == b"true",
            Token::False => word == b"false",
            Token::Null => word == b"null",
            Token::ObjStart => word == b"obj",
            Token::ObjEnd => word == b"endobj",
            Token::StreamStart => word == b"stream",
            Token::StreamEnd => word == b"endstream",
            Token::R => word == b"R",
            _ => false,
        }
    }
}

/// PDF whitespace characters (ISO 32000-1, Table 1).
pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

/// PDF delimiter characters (ISO 32000-1, Table 2).
pub fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

fn whitespace(input: &[u8]) -> IResult<&[u8], ()> {
    value((), take_while1(is_whitespace))(input)
}

/// Comments run from % to CR or LF.
fn comment(input: &[u8]) -> IResult<&[u8], ()> {
    value((), preceded(char('%'), take_till(|c| c == b'\r' || c == b'\n')))(input)
}

/// Skip all whitespace and comments.
pub fn skip_ws(input: &[u8]) -> IResult<&[u8], ()> {
    value((), many0(alt((whitespace, comment))))(input)
}

fn digit_error(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
}

/// Parse an integer or real number: 42, -123, +17, 3.14, .5, 0., -.002
fn parse_number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let start = input;
    let (input, sign) = opt(one_of("+-"))(input)?;
    let (input, int_part) = opt(digit1)(input)?;
    let (input, frac_part) = opt(preceded(char('.'), opt(digit1)))(input)?;

    if int_part.is_none() && !matches!(frac_part, Some(Some(_))) {
        return Err(digit_error(start));
    }
    // "12abc" is a keyword, not a number followed by a keyword
    if input.first().is_some_and(|&c| is_regular(c)) {
        return Err(digit_error(start));
    }

    let negative = sign == Some('-');
    match frac_part {
        Some(frac) => {
            let mut text = String::new();
            if negative {
                text.push('-');
            }
            text.push_str(std::str::from_utf8(int_part.unwrap_or(b"0")).map_err(|_| digit_error(start))?);
            text.push('.');
            text.push_str(std::str::from_utf8(frac.unwrap_or(b"0")).map_err(|_| digit_error(start))?);
            let num: f64 = text.parse().map_err(|_| digit_error(start))?;
            Ok((input, Token::Real(num)))
        },
        None => {
            let digits = int_part.ok_or_else(|| digit_error(start))?;
            let text = std::str::from_utf8(digits).map_err(|_| digit_error(start))?;
            let num: i64 = text.parse().map_err(|_| digit_error(start))?;
            Ok((input, Token::Integer(if negative { -num } else { num })))
        },
    }
}

/// Parse a literal string with balanced parentheses and escapes.
///
/// Escapes are skipped, not decoded. An unterminated string fails with an
/// empty remaining input so callers can tell truncation from garbage.
fn parse_literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (remaining, _) = char('(')(input)?;
    let mut depth = 1;
    let mut pos = 0;

    while depth > 0 && pos < remaining.len() {
        match remaining[pos] {
            b'\\' => pos += 2,
            b'(' => {
                depth += 1;
                pos += 1;
            },
            b')' => {
                depth -= 1;
                pos += 1;
            },
            _ => pos += 1,
        }
    }

    if depth != 0 || pos > remaining.len() {
        let end = &remaining[remaining.len()..];
        return Err(nom::Err::Error(nom::error::Error::new(end, nom::error::ErrorKind::Tag)));
    }

    Ok((&remaining[pos..], Token::LiteralString(&remaining[..pos - 1])))
}

/// Parse a hexadecimal string `<...>`; `<<` is left for the dictionary delimiter.
fn parse_hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    if input.starts_with(b"<<") {
        return Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag)));
    }
    let (rest, _) = char('<')(input)?;
    let (rest, digits) = take_while(|c: u8| c.is_ascii_hexdigit() || is_whitespace(c))(rest)?;
    let (rest, _) = char('>')(rest)?;
    Ok((rest, Token::HexString(digits)))
}

/// Decode `#XX` escape sequences in a raw name.
///
/// ```
/// # use pdf_xref::lexer::decode_name_escapes;
/// assert_eq!(decode_name_escapes(b"A#20B#23C"), "A B#C");
/// assert_eq!(decode_name_escapes(b"Type"), "Type");
/// assert_eq!(decode_name_escapes(b"A#"), "A#");
/// ```
pub fn decode_name_escapes(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            let hex = &raw[i + 1..i + 3];
            if hex.iter().all(u8::is_ascii_hexdigit) {
                let text = std::str::from_utf8(hex).unwrap_or("00");
                if let Ok(byte) = u8::from_str_radix(text, 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    preceded(
        char('/'),
        map(take_while(is_regular), |bytes| Token::Name(decode_name_escapes(bytes))),
    )(input)
}

fn parse_delimiter(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    alt((
        value(Token::DictStart, tag(b"<<")),
        value(Token::DictEnd, tag(b">>")),
        value(Token::ArrayStart, tag(b"[")),
        value(Token::ArrayEnd, tag(b"]")),
    ))(input)
}

fn parse_keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    map(take_while1(is_regular), |word: &[u8]| match word {
        b"true" => Token::True,
        b"false" => Token::False,
        b"null" => Token::Null,
        b"obj" => Token::ObjStart,
        b"endobj" => Token::ObjEnd,
        b"stream" => Token::StreamStart,
        b"endstream" => Token::StreamEnd,
        b"R" => Token::R,
        other => Token::Keyword(other),
    })(input)
}

/// Parse a single PDF token after skipping whitespace and comments.
///
/// Order matters: `<<` before hex strings, numbers before the generic
/// regular-character run.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (input, _) = skip_ws(input)?;
    alt((
        parse_delimiter,
        parse_name,
        parse_literal_string,
        parse_hex_string,
        parse_number,
        parse_keyword,
    ))(input)
}

/// Parse tokens until the input is exhausted or an error occurs.
pub fn tokens(input: &[u8]) -> IResult<&[u8], Vec<Token<'_>>> {
    many0(token)(input)
}
