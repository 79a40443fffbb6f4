//! Tests for object stream parsing (PDF 1.5+ feature).

mod common;

use common::deflate;
use pdf_xref::error::Error;
use pdf_xref::object::{Dictionary, IndirectObject, Name, Object, Reference};
use pdf_xref::objstm::ObjectStream;

/// Object stream 12 0 R holding `objects` in order, optionally Flate-compressed.
fn container(objects: &[(u32, &str)], compress: bool) -> IndirectObject {
    let mut header = String::new();
    let mut body = String::new();
    for &(number, text) in objects {
        header.push_str(&format!("{} {} ", number, body.len()));
        body.push_str(text);
        body.push('\n');
    }
    let plain = format!("{}{}", header, body).into_bytes();

    let mut dict = Dictionary::new();
    dict.set("Type", Name::new("ObjStm"));
    dict.set("N", objects.len() as i64);
    dict.set("First", header.len() as i64);
    let data = if compress {
        dict.set("Filter", Name::new("FlateDecode"));
        deflate(&plain)
    } else {
        plain
    };
    IndirectObject::with_stream(Reference::new(12, 0), dict, data)
}

#[test]
fn test_parse_object_stream_basic() {
    let stm = ObjectStream::parse(&container(&[(10, "42"), (11, "/Test")], false), 0).unwrap();
    assert_eq!(stm.len(), 2);
    assert_eq!(stm.reference(), Reference::new(12, 0));
    assert_eq!(stm.object_at(0).unwrap(), (10, Object::from(42)));
    assert_eq!(stm.object_at(1).unwrap().1.as_name(), Some("Test"));
}

#[test]
fn test_parse_compressed_object_stream() {
    let objects = [
        (1, "<< /Type /Catalog /Pages 2 0 R >>"),
        (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>"),
        (3, "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>"),
    ];
    let stm = ObjectStream::parse(&container(&objects, true), 0).unwrap();
    assert_eq!(stm.object_numbers().collect::<Vec<_>>(), vec![1, 2, 3]);

    let (_, page) = stm.object_at(2).unwrap();
    let page = page.as_dict().unwrap();
    assert_eq!(page.get_reference("Parent"), Some(Reference::new(2, 0)));
    assert_eq!(page.get("MediaBox").and_then(Object::as_array).map(|a| a.len()), Some(4));
}

#[test]
fn test_nested_containers_in_values() {
    let stm = ObjectStream::parse(&container(&[(7, "[(a) [1 2] << /K [3] >>]")], false), 0).unwrap();
    let (_, value) = stm.object_at(0).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 3);
}

#[test]
fn test_position_lookup() {
    let stm = ObjectStream::parse(&container(&[(5, "1"), (9, "2"), (7, "3")], false), 0).unwrap();
    assert_eq!(stm.position_of(7, Some(2)), Some(2));
    assert_eq!(stm.position_of(7, None), Some(2));
    assert_eq!(stm.position_of(9, Some(0)), Some(1));
    assert_eq!(stm.position_of(6, None), None);
}

#[test]
fn test_empty_object_stream() {
    let stm = ObjectStream::parse(&container(&[], false), 0).unwrap();
    assert!(stm.is_empty());
    assert!(stm.object_at(0).is_err());
}

#[test]
fn test_missing_first() {
    let mut obj = container(&[(1, "1")], false);
    if let Object::Dictionary(dict) = obj.value_mut() {
        dict.remove("First");
    }
    assert!(matches!(ObjectStream::parse(&obj, 0), Err(Error::InvalidStream(_))));
}

#[test]
fn test_first_beyond_data() {
    let mut obj = container(&[(1, "1")], false);
    if let Object::Dictionary(dict) = obj.value_mut() {
        dict.set("First", 500);
    }
    assert!(ObjectStream::parse(&obj, 0).is_err());
}

#[test]
fn test_excessive_count() {
    let mut obj = container(&[(1, "1")], false);
    if let Object::Dictionary(dict) = obj.value_mut() {
        dict.set("N", 5_000_000);
    }
    assert!(matches!(ObjectStream::parse(&obj, 0), Err(Error::ValueOutOfRange(_))));
}

#[test]
fn test_decompression_limit() {
    let big = "0 ".repeat(4096);
    let obj = container(&[(1, &format!("[{}]", big))], true);
    assert!(ObjectStream::parse(&obj, 0).is_ok());
    assert!(ObjectStream::parse(&obj, 1024).is_err());
}
