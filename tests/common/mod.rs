//! In-memory PDF builder for the integration tests.
//!
//! Offsets are tracked as objects are written, so XRef sections always point
//! at the right bytes unless a test deliberately writes them by hand.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use pdf_xref::{ParserOptions, PdfDocument, Result};

/// One XRef entry to write.
#[derive(Debug, Clone, Copy)]
pub enum Entry {
    Free { next: u32, generation: u16 },
    InUse { offset: u64, generation: u16 },
    Compressed { stream: u32, index: u32 },
}

pub struct PdfBuilder {
    buf: Vec<u8>,
    /// Entries of the section being built
    entries: Vec<(u32, Entry)>,
}

impl PdfBuilder {
    pub fn new(version: &str) -> Self {
        let mut buf = format!("%PDF-{}\n", version).into_bytes();
        buf.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");
        Self { buf, entries: Vec::new() }
    }

    pub fn offset(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Queue an entry for the next XRef section.
    pub fn entry(&mut self, number: u32, entry: Entry) -> &mut Self {
        self.entries.push((number, entry));
        self
    }

    /// Drain the queued entries, e.g. to split them between sections.
    pub fn take_entries(&mut self) -> Vec<(u32, Entry)> {
        std::mem::take(&mut self.entries)
    }

    /// Write `N G obj body endobj` and queue its in-use entry.
    pub fn object(&mut self, number: u32, generation: u16, body: &str) -> u64 {
        let offset = self.offset();
        let text = format!("{} {} obj\n{}\nendobj\n", number, generation, body);
        self.buf.extend_from_slice(text.as_bytes());
        self.entry(number, Entry::InUse { offset, generation });
        offset
    }

    /// Write a stream object. `dict` is the dictionary body without `/Length`
    /// unless `length` overrides the real payload length.
    pub fn stream(&mut self, number: u32, dict: &str, data: &[u8], length: Option<&str>) -> u64 {
        let offset = self.offset();
        let length = length.map_or_else(|| data.len().to_string(), str::to_string);
        let head = format!("{} 0 obj\n<< {} /Length {} >>\nstream\n", number, dict, length);
        self.buf.extend_from_slice(head.as_bytes());
        self.buf.extend_from_slice(data);
        self.buf.extend_from_slice(b"\nendstream\nendobj\n");
        self.entry(number, Entry::InUse { offset, generation: 0 });
        offset
    }

    /// Write a Flate-compressed object stream holding `objects` and queue
    /// compressed entries for them.
    pub fn object_stream(&mut self, number: u32, objects: &[(u32, &str)]) -> u64 {
        let mut header = String::new();
        let mut body = String::new();
        for &(n, text) in objects {
            header.push_str(&format!("{} {} ", n, body.len()));
            body.push_str(text);
            body.push(' ');
        }
        let plain = format!("{}{}", header, body);
        let dict = format!("/Type /ObjStm /N {} /First {} /Filter /FlateDecode", objects.len(), header.len());
        let offset = self.stream(number, &dict, &deflate(plain.as_bytes()), None);
        for (index, &(n, _)) in objects.iter().enumerate() {
            self.entry(
                n,
                Entry::Compressed {
                    stream: number,
                    index: index as u32,
                },
            );
        }
        offset
    }

    /// Write a classic `xref` table from the queued entries plus `trailer`
    /// (the dictionary body, without `/Size`). Returns the table offset.
    pub fn classic_xref(&mut self, size: u32, trailer: &str) -> u64 {
        let offset = self.offset();
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_by_key(|&(n, _)| n);
        self.buf.extend_from_slice(b"xref\n");
        for run in runs(&entries) {
            let head = format!("{} {}\n", run[0].0, run.len());
            self.buf.extend_from_slice(head.as_bytes());
            for &(_, entry) in run {
                let line = match entry {
                    Entry::Free { next, generation } => format!("{:010} {:05} f\r\n", next, generation),
                    Entry::InUse { offset, generation } => format!("{:010} {:05} n\r\n", offset, generation),
                    Entry::Compressed { .. } => panic!("classic tables cannot hold compressed entries"),
                };
                self.buf.extend_from_slice(line.as_bytes());
            }
        }
        let tail = format!("trailer\n<< /Size {} {} >>\n", size, trailer);
        self.buf.extend_from_slice(tail.as_bytes());
        offset
    }

    /// Write an XRef stream object `number` from the queued entries (its own
    /// entry included), `/W [1 4 2]`, Flate with the PNG Up predictor.
    pub fn xref_stream(&mut self, number: u32, size: u32, trailer: &str) -> u64 {
        let offset = self.offset();
        let mut entries = std::mem::take(&mut self.entries);
        entries.push((number, Entry::InUse { offset, generation: 0 }));
        entries.sort_by_key(|&(n, _)| n);

        let mut index = String::new();
        let mut rows = Vec::new();
        for run in runs(&entries) {
            index.push_str(&format!("{} {} ", run[0].0, run.len()));
            for &(_, entry) in run {
                let (kind, field2, field3) = match entry {
                    Entry::Free { next, generation } => (0u8, next as u64, generation as u32),
                    Entry::InUse { offset, generation } => (1, offset, generation as u32),
                    Entry::Compressed { stream, index } => (2, stream as u64, index),
                };
                let mut row = vec![kind];
                row.extend_from_slice(&(field2 as u32).to_be_bytes());
                row.extend_from_slice(&(field3 as u16).to_be_bytes());
                rows.push(row);
            }
        }

        let payload = deflate(&png_up(&rows));
        let head = format!(
            "{} 0 obj\n<< /Type /XRef /Size {} /W [1 4 2] /Index [{}] /Filter /FlateDecode \
             /DecodeParms << /Predictor 12 /Columns 7 >> /Length {} {} >>\nstream\n",
            number,
            size,
            index.trim_end(),
            payload.len(),
            trailer
        );
        self.buf.extend_from_slice(head.as_bytes());
        self.buf.extend_from_slice(&payload);
        self.buf.extend_from_slice(b"\nendstream\nendobj\n");
        offset
    }

    pub fn startxref(&mut self, offset: u64) -> &mut Self {
        let tail = format!("startxref\n{}\n%%EOF\n", offset);
        self.buf.extend_from_slice(tail.as_bytes());
        self
    }

    pub fn finish(&self) -> Vec<u8> {
        self.buf.clone()
    }
}

/// Maximal runs of consecutive object numbers.
fn runs(entries: &[(u32, Entry)]) -> Vec<&[(u32, Entry)]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=entries.len() {
        if i == entries.len() || entries[i].0 != entries[i - 1].0 + 1 {
            if start < i {
                runs.push(&entries[start..i]);
            }
            start = i;
        }
    }
    runs
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// PNG "Up" filter (type 2) over equal-length rows.
fn png_up(rows: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut prev = vec![0u8; rows.first().map_or(0, Vec::len)];
    for row in rows {
        out.push(2);
        out.extend(row.iter().zip(&prev).map(|(&b, &p)| b.wrapping_sub(p)));
        prev.clone_from(row);
    }
    out
}

/// Free list head for object 0.
pub const HEAD: Entry = Entry::Free {
    next: 0,
    generation: 65535,
};

/// Catalog, page tree and one page as objects 1 to 3, with a classic table.
pub fn minimal_pdf() -> Vec<u8> {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.entry(0, HEAD);
    pdf.object(1, 0, "<< /Type /Catalog /Pages 2 0 R >>");
    pdf.object(2, 0, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    pdf.object(3, 0, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>");
    let xref = pdf.classic_xref(4, "/Root 1 0 R");
    pdf.startxref(xref);
    pdf.finish()
}

pub fn parse(data: Vec<u8>, options: ParserOptions) -> Result<PdfDocument> {
    PdfDocument::parse(Cursor::new(data), options)
}
