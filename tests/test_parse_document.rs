//! End-to-end parsing of hand-built files.

mod common;

use common::{minimal_pdf, parse, Entry, PdfBuilder, HEAD};
use pdf_xref::object::{Object, Reference};
use pdf_xref::{Error, ParsePhase, ParserOptions, PdfVersion};

fn r(number: u32, generation: u16) -> Reference {
    Reference::new(number, generation)
}

fn root_cause_of(data: Vec<u8>, options: ParserOptions) -> (Option<ParsePhase>, Error) {
    let err = parse(data, options).unwrap_err();
    let phase = err.phase();
    match err {
        Error::Context { source, .. } => (phase, *source),
        other => (phase, other),
    }
}

#[test]
fn test_minimal_document() {
    let mut doc = parse(minimal_pdf(), ParserOptions::strict()).unwrap();

    assert_eq!(doc.pdf_version(), PdfVersion::V1_4);
    assert!(!doc.has_xref_stream());
    assert!(!doc.is_reconstructed());
    assert!(!doc.is_encrypted());
    assert_eq!(doc.num_incremental_updates(), 0);
    assert_eq!(doc.objects().object_count(), 3);
    assert_eq!(doc.objects().free_objects(), &[r(0, 65535)]);
    assert_eq!(doc.trailer().get_integer("Size"), Some(4));

    let catalog = doc.catalog().unwrap();
    assert_eq!(catalog.dictionary().unwrap().get_name("Type"), Some("Catalog"));

    let page = doc.objects_mut().resolve(r(3, 0)).unwrap().unwrap();
    assert_eq!(page.dictionary().unwrap().get_name("Type"), Some("Page"));
}

#[test]
fn test_xref_offset_points_at_table() {
    let data = minimal_pdf();
    let doc = parse(data.clone(), ParserOptions::default()).unwrap();
    let offset = doc.xref_offset() as usize;
    assert_eq!(&data[offset..offset + 4], b"xref");
    assert_eq!(doc.file_size(), data.len() as u64);
}

#[test]
fn test_not_a_pdf() {
    let (phase, err) = root_cause_of(b"GIF89a garbage".to_vec(), ParserOptions::default());
    assert_eq!(phase, Some(ParsePhase::Header));
    assert!(matches!(err, Error::NoPdfFile));
}

/// Original revision with objects 1 to 3, then an update that rewrites 3,
/// deletes 2 and adds 4.
fn updated_pdf() -> Vec<u8> {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.entry(0, HEAD);
    pdf.object(1, 0, "<< /Type /Catalog /Pages 3 0 R >>");
    pdf.object(2, 0, "(obsolete)");
    pdf.object(3, 0, "<< /Type /Pages /Count 0 >>");
    let first = pdf.classic_xref(4, "/Root 1 0 R /Info 2 0 R");
    pdf.startxref(first);

    pdf.entry(2, Entry::Free { next: 0, generation: 1 });
    pdf.object(3, 0, "<< /Type /Pages /Count 1 >>");
    pdf.object(4, 0, "(added)");
    let second = pdf.classic_xref(5, &format!("/Root 1 0 R /Prev {}", first));
    pdf.startxref(second);
    pdf.finish()
}

#[test]
fn test_incremental_update_newest_wins() {
    let mut doc = parse(updated_pdf(), ParserOptions::strict()).unwrap();
    assert_eq!(doc.num_incremental_updates(), 1);

    let pages = doc.objects_mut().resolve(r(3, 0)).unwrap().unwrap();
    assert_eq!(pages.dictionary().unwrap().get_integer("Count"), Some(1));

    // Deleted in the update even though the older table has it in use
    assert!(doc.objects().is_free(2));
    assert!(doc.objects().free_objects().contains(&r(2, 1)));
    assert!(doc.objects_mut().resolve(r(2, 0)).unwrap().is_none());

    assert!(doc.objects_mut().resolve(r(4, 0)).unwrap().is_some());
}

#[test]
fn test_trailers_merge_per_key() {
    let doc = parse(updated_pdf(), ParserOptions::default()).unwrap();
    let trailer = doc.trailer();
    // /Size from the newest section, /Info only in the oldest
    assert_eq!(trailer.get_integer("Size"), Some(5));
    assert_eq!(trailer.get_reference("Info"), Some(r(2, 0)));
    // Chain links are not part of the merged trailer
    assert!(!trailer.contains_key("Prev"));
}

#[test]
fn test_prev_cycle_is_rejected() {
    for options in [ParserOptions::strict(), ParserOptions::lenient()] {
        let mut pdf = PdfBuilder::new("1.4");
        pdf.entry(0, HEAD);
        pdf.object(1, 0, "<< /Type /Catalog >>");
        let xref = pdf.offset();
        let written = pdf.classic_xref(2, &format!("/Root 1 0 R /Prev {}", xref));
        assert_eq!(written, xref);
        pdf.startxref(xref);

        let (phase, err) = root_cause_of(pdf.finish(), options);
        assert_eq!(phase, Some(ParsePhase::XRefChain));
        assert!(matches!(err, Error::InvalidXRef(msg) if msg.contains("cycle")));
    }
}

/// Two sections naming each other as `/Prev`. The offset is padded so the
/// layout does not depend on its value.
fn mutual_prev(older_prev: u64) -> (Vec<u8>, u64) {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.entry(0, HEAD);
    pdf.object(1, 0, "<< /Type /Catalog >>");
    let older = pdf.classic_xref(2, &format!("/Root 1 0 R /Prev {:10}", older_prev));
    let newer = pdf.classic_xref(2, &format!("/Root 1 0 R /Prev {:10}", older));
    pdf.startxref(newer);
    (pdf.finish(), newer)
}

#[test]
fn test_mutual_prev_cycle() {
    let (_, newer) = mutual_prev(0);
    let (data, check) = mutual_prev(newer);
    assert_eq!(check, newer);

    for options in [ParserOptions::strict(), ParserOptions::lenient()] {
        let (phase, err) = root_cause_of(data.clone(), options);
        assert_eq!(phase, Some(ParsePhase::XRefChain));
        assert!(matches!(err, Error::InvalidXRef(msg) if msg.contains("cycle")));
    }
}

#[test]
fn test_small_trailer_size_is_tolerated() {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.entry(0, HEAD);
    pdf.object(1, 0, "<< /Type /Catalog >>");
    pdf.object(2, 0, "42");
    pdf.object(3, 0, "43");
    let xref = pdf.classic_xref(2, "/Root 1 0 R");
    pdf.startxref(xref);

    let doc = parse(pdf.finish(), ParserOptions::strict()).unwrap();
    assert_eq!(doc.xref_table().len(), 4);
    assert_eq!(doc.objects().object_count(), 3);
}

#[test]
fn test_xref_stream_with_object_stream() {
    let mut pdf = PdfBuilder::new("1.5");
    pdf.entry(0, HEAD);
    pdf.object_stream(
        4,
        &[
            (1, "<< /Type /Catalog /Pages 2 0 R >>"),
            (2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>"),
        ],
    );
    pdf.object(3, 0, "<< /Type /Page /Parent 2 0 R >>");
    let xref = pdf.xref_stream(5, 6, "/Root 1 0 R");
    pdf.startxref(xref);

    let mut doc = parse(pdf.finish(), ParserOptions::strict()).unwrap();
    assert!(doc.has_xref_stream());
    assert_eq!(doc.xref_offset(), xref);
    // 1 and 2 from the object stream, 3, the object stream and the XRef stream
    assert_eq!(doc.objects().object_count(), 5);

    let pages = doc.objects_mut().resolve(r(2, 0)).unwrap().unwrap();
    assert_eq!(pages.dictionary().unwrap().get_integer("Count"), Some(1));
    assert!(matches!(
        doc.xref_table().get(1),
        Some(pdf_xref::XRefEntry::Compressed { stream_object: 4, index: 0 })
    ));
}

#[test]
fn test_object_stream_on_demand() {
    let mut pdf = PdfBuilder::new("1.5");
    pdf.entry(0, HEAD);
    pdf.object_stream(4, &[(1, "<< /Type /Catalog >>"), (2, "(lazy)")]);
    let xref = pdf.xref_stream(5, 6, "/Root 1 0 R");
    pdf.startxref(xref);

    let options = ParserOptions::default().with_load_on_demand(true);
    let mut doc = parse(pdf.finish(), options).unwrap();
    assert!(doc.is_load_on_demand());
    // Object streams are expanded during the parse even when loading on demand
    assert_eq!(doc.objects().object_count(), 3);
    let lazy = doc.objects_mut().resolve(r(2, 0)).unwrap().unwrap();
    assert_eq!(lazy.value().as_string().unwrap().as_bytes(), b"lazy");
    // Objects inside object streams only exist in generation 0
    assert!(doc.objects_mut().resolve(r(2, 1)).unwrap().is_none());
}

#[test]
fn test_broken_object_stream_on_demand() {
    let mut pdf = PdfBuilder::new("1.5");
    pdf.entry(0, HEAD);
    pdf.object(1, 0, "<< /Type /Catalog >>");
    pdf.entry(2, Entry::Compressed { stream: 9, index: 0 });
    let xref = pdf.xref_stream(5, 6, "/Root 1 0 R");
    pdf.startxref(xref);
    let data = pdf.finish();

    let options = ParserOptions::default().with_load_on_demand(true);
    let mut doc = parse(data.clone(), options.clone()).unwrap();
    assert!(doc.objects_mut().get_indirect_object(r(2, 0)).is_none());

    let (phase, err) = root_cause_of(data, options.dont_ignore_broken_objects());
    assert_eq!(phase, Some(ParsePhase::ObjectStreams));
    assert!(matches!(err, Error::InvalidXRef(_)));
}

#[test]
fn test_object_missing_from_object_stream() {
    let mut pdf = PdfBuilder::new("1.5");
    pdf.entry(0, HEAD);
    pdf.object_stream(4, &[(1, "<< /Type /Catalog >>")]);
    pdf.entry(2, Entry::Compressed { stream: 4, index: 1 });
    let xref = pdf.xref_stream(5, 6, "/Root 1 0 R");
    pdf.startxref(xref);

    let mut doc = parse(pdf.finish(), ParserOptions::strict()).unwrap();
    assert!(doc.objects_mut().resolve(r(1, 0)).unwrap().is_some());
    assert!(doc.objects_mut().resolve(r(2, 0)).unwrap().is_none());
}

#[test]
fn test_hybrid_file() {
    // PDF 1.4 header: /XRefStm is followed regardless of version
    let mut pdf = PdfBuilder::new("1.4");
    pdf.object(1, 0, "<< /Type /Catalog /Pages 2 0 R >>");
    pdf.object_stream(4, &[(2, "<< /Type /Pages /Count 0 >>")]);
    let queued = pdf.take_entries();
    for &(n, entry) in &queued {
        if matches!(entry, Entry::Compressed { .. }) {
            pdf.entry(n, entry);
        }
    }
    let stream = pdf.xref_stream(5, 6, "");

    pdf.entry(0, HEAD);
    for &(n, entry) in &queued {
        if matches!(entry, Entry::InUse { .. }) {
            pdf.entry(n, entry);
        }
    }
    let xref = pdf.classic_xref(6, &format!("/Root 1 0 R /XRefStm {}", stream));
    pdf.startxref(xref);

    let mut doc = parse(pdf.finish(), ParserOptions::strict()).unwrap();
    assert!(doc.has_xref_stream());
    assert_eq!(doc.num_incremental_updates(), 1);
    let pages = doc.objects_mut().resolve(r(2, 0)).unwrap().unwrap();
    assert_eq!(pages.dictionary().unwrap().get_name("Type"), Some("Pages"));
}

#[test]
fn test_xref_stream_in_pdf_1_4_needs_hybrid() {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.entry(0, HEAD);
    pdf.object(1, 0, "<< /Type /Catalog >>");
    let xref = pdf.xref_stream(2, 3, "/Root 1 0 R");
    pdf.startxref(xref);

    let (phase, err) = root_cause_of(pdf.finish(), ParserOptions::strict());
    assert_eq!(phase, Some(ParsePhase::XRefChain));
    assert!(matches!(err, Error::NoXRef(_)));
}

#[test]
fn test_garbage_after_eof() {
    let mut data = minimal_pdf();
    data.extend_from_slice(b"\x00\x00 trailing junk from a bad upload");

    let (phase, err) = root_cause_of(data.clone(), ParserOptions::strict());
    assert_eq!(phase, Some(ParsePhase::EofMarker));
    assert!(matches!(err, Error::NoEofToken));

    let doc = parse(data, ParserOptions::lenient()).unwrap();
    assert_eq!(doc.objects().object_count(), 3);
}

#[test]
fn test_startref_misspelling() {
    let original = minimal_pdf();
    let at = original.windows(9).rposition(|w| w == b"startxref").unwrap();
    let mut data = original[..at].to_vec();
    data.extend_from_slice(b"startref");
    data.extend_from_slice(&original[at + 9..]);

    let doc = parse(data.clone(), ParserOptions::lenient()).unwrap();
    assert!(!doc.is_reconstructed());
    assert_eq!(doc.objects().object_count(), 3);

    let (phase, err) = root_cause_of(data, ParserOptions::strict());
    assert_eq!(phase, Some(ParsePhase::XRefChain));
    assert!(matches!(err, Error::NoXRef(_)));
}

#[test]
fn test_startxref_past_end_of_file() {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.entry(0, HEAD);
    pdf.object(1, 0, "<< /Type /Catalog >>");
    let xref = pdf.classic_xref(2, "/Root 1 0 R");
    pdf.startxref(xref + 100_000);
    let data = pdf.finish();

    let doc = parse(data.clone(), ParserOptions::lenient()).unwrap();
    assert_eq!(doc.xref_offset(), xref);
    assert!(!doc.is_reconstructed());

    let (_, err) = root_cause_of(data, ParserOptions::strict());
    assert!(matches!(err, Error::InvalidXRef(_)));
}

#[test]
fn test_reconstruction_without_xref() {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.object(1, 0, "<< /Type /Pages /Count 0 >>");
    pdf.object(2, 0, "<< /Type /Catalog /Pages 1 0 R >>");
    pdf.object(3, 0, "(text)");
    pdf.take_entries();
    // Points at the header, which is neither a table nor an XRef stream
    pdf.startxref(0);
    let data = pdf.finish();

    let mut doc = parse(data.clone(), ParserOptions::lenient()).unwrap();
    assert!(doc.is_reconstructed());
    assert_eq!(doc.trailer().get_reference("Root"), Some(r(2, 0)));
    assert_eq!(doc.trailer().get_integer("Size"), Some(4));
    assert_eq!(doc.catalog().unwrap().indirect_reference(), r(2, 0));

    let (phase, err) = root_cause_of(data, ParserOptions::strict());
    assert_eq!(phase, Some(ParsePhase::XRefChain));
    assert!(matches!(err, Error::NoXRef(_)));
}

/// Object 3's entry points at object 2's header.
fn misdirected_pdf() -> Vec<u8> {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.entry(0, HEAD);
    pdf.object(1, 0, "<< /Type /Catalog >>");
    let two = pdf.object(2, 0, "(two)");
    pdf.object(3, 0, "(three)");
    let mut queued = pdf.take_entries();
    for (n, entry) in queued.iter_mut() {
        if *n == 3 {
            *entry = Entry::InUse {
                offset: two,
                generation: 0,
            };
        }
    }
    for (n, entry) in queued {
        pdf.entry(n, entry);
    }
    let xref = pdf.classic_xref(4, "/Root 1 0 R");
    pdf.startxref(xref);
    pdf.finish()
}

#[test]
fn test_broken_object_ignored() {
    let doc = parse(misdirected_pdf(), ParserOptions::default()).unwrap();
    assert!(doc.objects().is_free(3));
    assert!(doc.objects().free_objects().contains(&r(3, 0)));
    assert_eq!(doc.objects().object_count(), 2);
}

#[test]
fn test_broken_object_fatal() {
    let options = ParserOptions::default().dont_ignore_broken_objects();
    let (phase, err) = root_cause_of(misdirected_pdf(), options);
    assert_eq!(phase, Some(ParsePhase::Objects));
    assert!(matches!(err, Error::NoObject { .. }));
}

#[test]
fn test_in_use_at_offset_zero() {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.entry(0, HEAD);
    pdf.object(1, 0, "<< /Type /Catalog >>");
    pdf.entry(2, Entry::InUse { offset: 0, generation: 0 });
    let xref = pdf.classic_xref(3, "/Root 1 0 R");
    pdf.startxref(xref);
    let data = pdf.finish();

    let doc = parse(data.clone(), ParserOptions::lenient()).unwrap();
    assert!(doc.objects().free_objects().contains(&r(2, 1)));

    let (phase, err) = root_cause_of(data, ParserOptions::strict());
    assert_eq!(phase, Some(ParsePhase::Objects));
    assert!(matches!(err, Error::InvalidXRef(_)));
}

#[test]
fn test_exhausted_generation_is_unavailable() {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.entry(0, HEAD);
    pdf.object(1, 0, "<< /Type /Catalog >>");
    pdf.entry(2, Entry::Free { next: 0, generation: 65535 });
    pdf.entry(3, Entry::Free { next: 0, generation: 4 });
    let xref = pdf.classic_xref(4, "/Root 1 0 R");
    pdf.startxref(xref);

    let doc = parse(pdf.finish(), ParserOptions::strict()).unwrap();
    assert!(doc.objects().is_unavailable(2));
    assert!(!doc.objects().is_unavailable(3));
    assert_eq!(doc.objects().next_free_object(), r(3, 4));
}

#[test]
fn test_undeclared_numbers_become_free() {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.entry(0, HEAD);
    pdf.object(1, 0, "<< /Type /Catalog >>");
    pdf.object(4, 0, "null");
    let xref = pdf.classic_xref(5, "/Root 1 0 R");
    pdf.startxref(xref);

    let doc = parse(pdf.finish(), ParserOptions::strict()).unwrap();
    assert!(doc.objects().free_objects().contains(&r(2, 1)));
    assert!(doc.objects().free_objects().contains(&r(3, 1)));
}

fn indirect_length_pdf() -> Vec<u8> {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.entry(0, HEAD);
    pdf.object(1, 0, "<< /Type /Catalog >>");
    pdf.stream(2, "/Subtype /XML", b"<x>payload</x>", Some("3 0 R"));
    pdf.object(3, 0, "14");
    let xref = pdf.classic_xref(4, "/Root 1 0 R");
    pdf.startxref(xref);
    pdf.finish()
}

#[test]
fn test_indirect_length_eager() {
    let mut doc = parse(indirect_length_pdf(), ParserOptions::strict()).unwrap();
    let data = doc.objects_mut().stream_data(r(2, 0)).unwrap().unwrap();
    assert_eq!(&data[..], b"<x>payload</x>");
}

#[test]
fn test_indirect_length_on_demand() {
    let options = ParserOptions::strict().with_load_on_demand(true);
    let mut doc = parse(indirect_length_pdf(), options).unwrap();
    // Only the catalog, read for /Version
    assert_eq!(doc.objects().object_count(), 1);

    let data = doc.objects_mut().stream_data(r(2, 0)).unwrap().unwrap();
    assert_eq!(&data[..], b"<x>payload</x>");
    assert_eq!(doc.objects().object_count(), 3);
}

#[test]
fn test_wrong_stream_length() {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.entry(0, HEAD);
    pdf.object(1, 0, "<< /Type /Catalog >>");
    pdf.stream(2, "", b"0123456789", Some("4"));
    let xref = pdf.classic_xref(3, "/Root 1 0 R");
    pdf.startxref(xref);
    let data = pdf.finish();

    let mut doc = parse(data.clone(), ParserOptions::lenient()).unwrap();
    let payload = doc.objects_mut().stream_data(r(2, 0)).unwrap().unwrap();
    assert_eq!(&payload[..], b"0123456789");

    let options = ParserOptions::strict().dont_ignore_broken_objects();
    let (phase, err) = root_cause_of(data, options);
    assert_eq!(phase, Some(ParsePhase::Streams));
    assert!(matches!(err, Error::InvalidStream(_)));
}

#[test]
fn test_wrong_password() {
    let filler = format!("<{}>", "AB".repeat(32));
    let mut pdf = PdfBuilder::new("1.4");
    pdf.entry(0, HEAD);
    pdf.object(1, 0, "<< /Type /Catalog >>");
    pdf.object(
        2,
        0,
        &format!("<< /Filter /Standard /V 1 /R 2 /O {} /U {} /P -4 >>", filler, filler),
    );
    let xref = pdf.classic_xref(3, "/Root 1 0 R /Encrypt 2 0 R /ID [<00112233> <00112233>]");
    pdf.startxref(xref);

    let (phase, err) = root_cause_of(pdf.finish(), ParserOptions::default().with_password("nope"));
    assert_eq!(phase, Some(ParsePhase::Encryption));
    assert!(matches!(err, Error::InvalidPassword));
}

#[test]
fn test_encrypt_without_id() {
    let mut pdf = PdfBuilder::new("1.4");
    pdf.entry(0, HEAD);
    pdf.object(1, 0, "<< /Type /Catalog >>");
    let xref = pdf.classic_xref(2, "/Root 1 0 R /Encrypt << /Filter /Standard /R 2 >>");
    pdf.startxref(xref);

    let (_, err) = root_cause_of(pdf.finish(), ParserOptions::default());
    assert!(matches!(err, Error::InvalidEncryptionDict(_)));
}

#[test]
fn test_null_encrypt_is_unencrypted() {
    for encrypt in ["null", "9 0 R"] {
        let mut pdf = PdfBuilder::new("1.4");
        pdf.entry(0, HEAD);
        pdf.object(1, 0, "<< /Type /Catalog /Title (plain) >>");
        let xref = pdf.classic_xref(2, &format!("/Root 1 0 R /Encrypt {}", encrypt));
        pdf.startxref(xref);

        let mut doc = parse(pdf.finish(), ParserOptions::strict()).unwrap();
        assert!(!doc.is_encrypted(), "/Encrypt {}", encrypt);
        assert!(doc.security_handler().is_none());
        let catalog = doc.catalog().unwrap();
        let title = catalog.value().as_dict().unwrap().get("Title").unwrap();
        assert_eq!(title.as_string().unwrap().as_bytes(), b"plain");
    }
}

#[test]
fn test_dereference_through_document() {
    let mut doc = parse(minimal_pdf(), ParserOptions::default()).unwrap();
    let root = doc.trailer().get_reference("Root").unwrap();
    let catalog = doc.objects_mut().dereference(&Object::Reference(root)).unwrap();
    let pages = catalog.as_dict().unwrap().get("Pages").cloned().unwrap();
    let pages = doc.objects_mut().dereference(&pages).unwrap();
    assert_eq!(pages.as_dict().unwrap().get_integer("Count"), Some(1));

    assert_eq!(doc.objects_mut().dereference(&Object::Reference(r(40, 0))).unwrap(), Object::Null);
}
