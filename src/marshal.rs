//! PDF syntax serialization of object values.
//!
//! Output is deterministic: dictionaries keep insertion order and reals are
//! written with at most five decimals.

use std::io::Write;

use crate::error::{Error, Result};
use crate::object::{
    Array, Dictionary, IndirectObject, Name, Number, Object, PdfString, RawData, Reference, StreamPayload,
};

/// Writes a value in PDF syntax.
pub trait Marshal {
    fn write_pdf(&self, w: &mut dyn Write) -> Result<()>;

    /// Serialize into a fresh buffer.
    fn to_pdf_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_pdf(&mut buf)?;
        Ok(buf)
    }
}

impl Marshal for bool {
    fn write_pdf(&self, w: &mut dyn Write) -> Result<()> {
        w.write_all(if *self { b"true" } else { b"false" })?;
        Ok(())
    }
}

impl Marshal for Number {
    fn write_pdf(&self, w: &mut dyn Write) -> Result<()> {
        match *self {
            Number::Integer(i) => write!(w, "{}", i)?,
            Number::Real(r) if !r.is_finite() => {
                log::warn!("Non-finite real {} written as 0", r);
                w.write_all(b"0")?;
            },
            Number::Real(r) => {
                let formatted = format!("{:.5}", r);
                let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
                match trimmed {
                    "" | "-" | "-0" => w.write_all(b"0")?,
                    t => w.write_all(t.as_bytes())?,
                }
            },
        }
        Ok(())
    }
}

impl Marshal for PdfString {
    fn write_pdf(&self, w: &mut dyn Write) -> Result<()> {
        if self.is_hex() {
            w.write_all(b"<")?;
            for byte in self.as_bytes() {
                write!(w, "{:02X}", byte)?;
            }
            w.write_all(b">")?;
            return Ok(());
        }

        w.write_all(b"(")?;
        for &byte in self.as_bytes() {
            match byte {
                b'(' => w.write_all(b"\\(")?,
                b')' => w.write_all(b"\\)")?,
                b'\\' => w.write_all(b"\\\\")?,
                b'\n' => w.write_all(b"\\n")?,
                b'\r' => w.write_all(b"\\r")?,
                b'\t' => w.write_all(b"\\t")?,
                0x08 => w.write_all(b"\\b")?,
                0x0C => w.write_all(b"\\f")?,
                0x20..=0x7E => w.write_all(&[byte])?,
                _ => write!(w, "\\{:03o}", byte)?,
            }
        }
        w.write_all(b")")?;
        Ok(())
    }
}

impl Marshal for Name {
    fn write_pdf(&self, w: &mut dyn Write) -> Result<()> {
        w.write_all(b"/")?;
        for byte in self.as_str().bytes() {
            match byte {
                b'#' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' => {
                    write!(w, "#{:02X}", byte)?
                },
                0x21..=0x7E => w.write_all(&[byte])?,
                _ => write!(w, "#{:02X}", byte)?,
            }
        }
        Ok(())
    }
}

impl Marshal for Reference {
    fn write_pdf(&self, w: &mut dyn Write) -> Result<()> {
        write!(w, "{} {} R", self.object_number, self.generation)?;
        Ok(())
    }
}

impl Marshal for RawData {
    fn write_pdf(&self, w: &mut dyn Write) -> Result<()> {
        w.write_all(&self.0)?;
        Ok(())
    }
}

impl Marshal for Array {
    fn write_pdf(&self, w: &mut dyn Write) -> Result<()> {
        w.write_all(b"[")?;
        for (i, item) in self.iter().enumerate() {
            if i > 0 {
                w.write_all(b" ")?;
            }
            item.write_pdf(w)?;
        }
        w.write_all(b"]")?;
        Ok(())
    }
}

impl Marshal for Dictionary {
    fn write_pdf(&self, w: &mut dyn Write) -> Result<()> {
        w.write_all(b"<<")?;
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                w.write_all(b" ")?;
            }
            key.write_pdf(w)?;
            w.write_all(b" ")?;
            value.write_pdf(w)?;
        }
        w.write_all(b">>")?;
        Ok(())
    }
}

impl Marshal for Object {
    fn write_pdf(&self, w: &mut dyn Write) -> Result<()> {
        match self {
            Object::Null => {
                w.write_all(b"null")?;
                Ok(())
            },
            Object::Bool(b) => b.write_pdf(w),
            Object::Number(n) => n.write_pdf(w),
            Object::String(s) => s.write_pdf(w),
            Object::Name(n) => n.write_pdf(w),
            Object::Array(a) => a.write_pdf(w),
            Object::Dictionary(d) => d.write_pdf(w),
            Object::Reference(r) => r.write_pdf(w),
            Object::RawData(r) => r.write_pdf(w),
        }
    }
}

/// `N G obj ... endobj`. A stream is written with its payload and a
/// `/Length` matching it; a payload that was never loaded is an error.
impl Marshal for IndirectObject {
    fn write_pdf(&self, w: &mut dyn Write) -> Result<()> {
        let reference = self.indirect_reference();
        writeln!(w, "{} {} obj", reference.object_number, reference.generation)?;
        match self.stream_payload() {
            None => self.value().write_pdf(w)?,
            Some(StreamPayload::Loaded(data)) => {
                let mut dict = self.dictionary()?.clone();
                dict.set("Length", data.len() as i64);
                dict.write_pdf(w)?;
                w.write_all(b"\nstream\n")?;
                w.write_all(data)?;
                w.write_all(b"\nendstream")?;
            },
            Some(_) => {
                return Err(Error::InvalidStream(format!(
                    "stream payload of {} is not loaded",
                    reference
                )));
            },
        }
        w.write_all(b"\nendobj\n")?;
        Ok(())
    }
}
