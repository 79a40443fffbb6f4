//! PDF document parsing.
//!
//! [`PdfDocument::parse`] runs the whole structural parse of a file:
//!
//! 1. `%PDF-x.y` header
//! 2. `%%EOF` marker
//! 3. XRef chain (with reconstruction when lenient)
//! 4. trailer checks
//! 5. encryption
//! 6. in-use objects
//! 7. object streams
//! 8. stream payloads
//! 9. catalog `/Version`
//!
//! Every step's failure is wrapped in [`Error::Context`] naming the step.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use serde::Serialize;

use crate::encryption::{SecurityHandler, StandardSecurityHandler};
use crate::error::{Error, ParsePhase, PhaseExt, Result};
use crate::marshal::Marshal;
use crate::object::{Dictionary, IndirectObject, Object, Reference, FIRST_GENERATION};
use crate::parser_config::ParserOptions;
use crate::repository::{IndirectObjectRepository, ObjectSource};
use crate::tokenizer::read_up_to;
use crate::version::PdfVersion;
use crate::xref::{find_eof_marker, XRefEntry, XRefResolution, XRefResolver, XRefTable};

/// A parsed PDF: its merged trailer and every indirect object.
///
/// # Example
///
/// ```no_run
/// use pdf_xref::document::PdfDocument;
/// use pdf_xref::parser_config::ParserOptions;
///
/// let mut doc = PdfDocument::open("sample.pdf", ParserOptions::default())?;
/// println!("PDF {} with {} objects", doc.pdf_version(), doc.objects().object_count());
/// let catalog = doc.catalog()?;
/// println!("Catalog: {:?}", catalog.dictionary()?.get("Pages"));
/// # Ok::<(), pdf_xref::error::Error>(())
/// ```
#[derive(Debug)]
pub struct PdfDocument {
    version: PdfVersion,
    header_version: PdfVersion,
    trailer: Dictionary,
    table: XRefTable,
    objects: IndirectObjectRepository,
    file_size: u64,
    xref_offset: u64,
    has_xref_stream: bool,
    incremental_updates: usize,
    reconstructed: bool,
    encrypted: bool,
    options: ParserOptions,
}

impl PdfDocument {
    /// Open and parse the file at `path`.
    pub fn open(path: impl AsRef<Path>, options: ParserOptions) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Opening {}", path.display());
        let file = File::open(path)?;
        Self::parse(BufReader::new(file), options)
    }

    /// Parse a PDF from any seekable byte source.
    pub fn parse<R: Read + Seek + 'static>(mut reader: R, options: ParserOptions) -> Result<Self> {
        let header_version = parse_header(&mut reader).phase(ParsePhase::Header)?;
        let file_size = reader.seek(SeekFrom::End(0))?;
        log::debug!("PDF {} header, {} bytes", header_version, file_size);

        let eof_offset = find_eof_marker(&mut reader, file_size, options.strict).phase(ParsePhase::EofMarker)?;

        let resolution = XRefResolver::new(&mut reader, header_version, file_size, eof_offset, &options)
            .resolve()
            .phase(ParsePhase::XRefChain)?;
        let XRefResolution {
            table,
            trailer,
            xref_offset,
            has_xref_stream,
            incremental_updates,
            reconstructed,
        } = resolution;

        check_trailer(&trailer, &table, options.strict).phase(ParsePhase::Trailer)?;

        let source = ObjectSource::new(Box::new(reader), file_size, &options);
        let mut doc = Self {
            version: header_version,
            header_version,
            trailer,
            table,
            objects: IndirectObjectRepository::with_source(source),
            file_size,
            xref_offset,
            has_xref_stream,
            incremental_updates,
            reconstructed,
            encrypted: false,
            options,
        };

        doc.seed_repository();
        doc.setup_encryption().phase(ParsePhase::Encryption)?;
        doc.materialize_objects().phase(ParsePhase::Objects)?;
        doc.expand_object_streams().phase(ParsePhase::ObjectStreams)?;
        if !doc.options.load_on_demand {
            doc.load_streams().phase(ParsePhase::Streams)?;
        }
        doc.apply_catalog_version().phase(ParsePhase::Version)?;

        log::info!(
            "Parsed PDF {}: {} XRef slots, {} objects loaded, {} incremental updates",
            doc.version,
            doc.table.len(),
            doc.objects.object_count(),
            doc.incremental_updates
        );
        Ok(doc)
    }

    /// Declare in-use and compressed entries so they can be resolved lazily.
    fn seed_repository(&mut self) {
        for (number, entry) in self.table.iter() {
            match *entry {
                XRefEntry::InUse { offset, generation } if offset > 0 && number > 0 => {
                    self.objects.insert_pending(Reference::new(number, generation), offset);
                },
                XRefEntry::Compressed { stream_object, index } if number > 0 => {
                    self.objects.insert_compressed(number, stream_object, index);
                },
                _ => {},
            }
        }
    }

    fn setup_encryption(&mut self) -> Result<()> {
        let Some(encrypt) = self.trailer.get("Encrypt").cloned() else {
            return Ok(());
        };
        let dict = match encrypt {
            Object::Reference(r) => {
                if let Some(source) = self.objects.source_mut() {
                    source.exempt_from_decryption(r.object_number);
                }
                let Some(obj) = self.objects.resolve(r)? else {
                    log::warn!("/Encrypt {} does not resolve; treating the document as unencrypted", r);
                    return Ok(());
                };
                match obj.value() {
                    Object::Dictionary(dict) => dict.clone(),
                    Object::Null => return Ok(()),
                    other => {
                        return Err(Error::InvalidEncryptionDict(format!(
                            "/Encrypt {} is a {}, not a dictionary",
                            r,
                            other.kind()
                        )))
                    },
                }
            },
            Object::Dictionary(dict) => dict,
            Object::Null => return Ok(()),
            other => {
                return Err(Error::InvalidEncryptionDict(format!(
                    "/Encrypt is a {}, not a dictionary",
                    other.kind()
                )))
            },
        };

        let document_id = self.document_id()?;
        let mut handler = StandardSecurityHandler::new(&dict)?;
        if !handler.authenticate(&self.options.password, &document_id) {
            return Err(Error::InvalidPassword);
        }
        log::info!("Document is encrypted; password accepted");
        if let Some(source) = self.objects.source_mut() {
            source.set_security_handler(Box::new(handler));
        }
        self.encrypted = true;
        Ok(())
    }

    /// First element of the trailer `/ID`.
    fn document_id(&mut self) -> Result<Vec<u8>> {
        let id = match self.trailer.get("ID").cloned() {
            Some(value) => self.objects.dereference(&value)?,
            None => return Err(Error::InvalidEncryptionDict("trailer has no /ID".to_string())),
        };
        id.as_array()
            .and_then(|ids| ids.get(0))
            .and_then(Object::as_string)
            .map(|s| s.as_bytes().to_vec())
            .ok_or_else(|| Error::InvalidEncryptionDict("trailer /ID has no string element".to_string()))
    }

    fn materialize_objects(&mut self) -> Result<()> {
        let entries: Vec<(u32, XRefEntry)> = self.table.iter().map(|(n, e)| (n, *e)).collect();
        let mut declared = vec![false; self.table.len()];

        for (number, entry) in entries {
            declared[number as usize] = true;
            match entry {
                XRefEntry::InUse { .. } if number == 0 => {
                    log::warn!("Ignoring in-use XRef entry for object 0");
                },
                XRefEntry::InUse { offset: 0, generation: 0 } => {
                    if self.options.strict {
                        return Err(Error::InvalidXRef(format!("object {} is in use at offset 0", number)));
                    }
                    log::warn!("Object {} is in use at offset 0; treating it as free", number);
                    self.objects.safe_add_free_object(Reference::new(number, FIRST_GENERATION));
                },
                XRefEntry::InUse { offset: 0, generation } => {
                    self.objects.safe_add_free_object(Reference::new(number, generation));
                },
                XRefEntry::InUse { generation, .. } => {
                    if self.options.load_on_demand {
                        continue;
                    }
                    let reference = Reference::new(number, generation);
                    if let Err(e) = self.objects.resolve(reference) {
                        if !self.options.ignore_broken_objects {
                            return Err(e);
                        }
                        log::error!("Ignoring broken object {}: {}", reference, e);
                        self.objects.safe_add_free_object(reference);
                    }
                },
                XRefEntry::Free { generation, .. } => {
                    if number > 0 {
                        self.objects.safe_add_free_object(Reference::new(number, generation));
                    }
                },
                XRefEntry::Compressed { .. } => {},
            }
        }

        for (number, seen) in declared.into_iter().enumerate().skip(1) {
            if !seen {
                self.objects.add_free_object(Reference::new(number as u32, FIRST_GENERATION));
            }
        }
        Ok(())
    }

    fn expand_object_streams(&mut self) -> Result<()> {
        let mut by_container: BTreeMap<u32, usize> = BTreeMap::new();
        for (_, container) in self.objects.compressed_objects() {
            *by_container.entry(container).or_default() += 1;
        }
        for (container, count) in by_container {
            log::debug!("Expanding object stream {} ({} objects)", container, count);
            if let Err(e) = self.objects.expand_object_stream(container) {
                if !self.options.ignore_broken_objects {
                    return Err(e);
                }
                log::error!("Skipping object stream {}: {}", container, e);
            }
        }
        Ok(())
    }

    /// Second pass: a `/Length` may reference an object that was not loaded
    /// when the stream's dictionary was read.
    fn load_streams(&mut self) -> Result<()> {
        let pending: Vec<Reference> = self
            .objects
            .iter()
            .filter(|obj| obj.has_pending_stream())
            .map(IndirectObject::indirect_reference)
            .collect();
        for reference in pending {
            if let Err(e) = self.objects.load_stream(reference) {
                if !self.options.ignore_broken_objects {
                    return Err(e);
                }
                log::error!("Cannot load stream of {}: {}", reference, e);
            }
        }
        Ok(())
    }

    fn apply_catalog_version(&mut self) -> Result<()> {
        let Some(root) = self.trailer.get_reference("Root") else {
            return Ok(());
        };
        let name = match self.objects.get_indirect_object(root) {
            Some(catalog) => catalog.value().as_dict().and_then(|d| d.get_name("Version")).map(str::to_string),
            None => None,
        };
        if let Some(name) = name {
            match name.parse::<PdfVersion>() {
                Ok(version) => {
                    if version != self.version {
                        log::info!("Catalog /Version {} supersedes header version {}", version, self.version);
                    }
                    self.version = version;
                },
                Err(_) => log::warn!("Ignoring unsupported catalog /Version {}", name),
            }
        }
        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Trailer merged over every XRef section, newest first.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    pub fn objects(&self) -> &IndirectObjectRepository {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut IndirectObjectRepository {
        &mut self.objects
    }

    /// Merged XRef table.
    pub fn xref_table(&self) -> &XRefTable {
        &self.table
    }

    /// Effective version: the catalog `/Version` when valid, else the header's.
    pub fn pdf_version(&self) -> PdfVersion {
        self.version
    }

    pub fn header_version(&self) -> PdfVersion {
        self.header_version
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of `/Prev` and `/XRefStm` links followed.
    pub fn num_incremental_updates(&self) -> usize {
        self.incremental_updates
    }

    /// Offset of the newest XRef section, corrected when `startxref` pointed
    /// past the end of the file.
    pub fn xref_offset(&self) -> u64 {
        self.xref_offset
    }

    pub fn has_xref_stream(&self) -> bool {
        self.has_xref_stream
    }

    /// True when the XRef table was rebuilt by scanning the file.
    pub fn is_reconstructed(&self) -> bool {
        self.reconstructed
    }

    pub fn is_load_on_demand(&self) -> bool {
        self.options.load_on_demand
    }

    pub fn is_strict(&self) -> bool {
        self.options.strict
    }

    pub fn password(&self) -> &str {
        &self.options.password
    }

    pub fn security_handler(&self) -> Option<&dyn SecurityHandler> {
        self.objects.source().and_then(ObjectSource::security_handler)
    }

    /// The document catalog named by the trailer `/Root`.
    pub fn catalog(&mut self) -> Result<&IndirectObject> {
        let root = self.trailer.get_reference("Root").ok_or(Error::NoTrailer)?;
        self.objects.resolve(root)?.ok_or_else(|| Error::NoObject {
            offset: 0,
            reason: format!("catalog {} does not resolve", root),
        })
    }

    /// Serializable overview of the parse.
    pub fn summary(&self) -> DocumentSummary {
        let trailer = self
            .trailer
            .iter()
            .map(|(key, value)| {
                let text = value
                    .to_pdf_bytes()
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_default();
                (key.as_str().to_string(), text)
            })
            .collect();
        DocumentSummary {
            version: self.version,
            header_version: self.header_version,
            file_size: self.file_size,
            xref_offset: self.xref_offset,
            has_xref_stream: self.has_xref_stream,
            incremental_updates: self.incremental_updates,
            reconstructed: self.reconstructed,
            encrypted: self.encrypted,
            load_on_demand: self.options.load_on_demand,
            strict: self.options.strict,
            xref_slots: self.table.len(),
            objects_loaded: self.objects.object_count(),
            free_objects: self.objects.free_objects().to_vec(),
            trailer,
        }
    }
}

/// What `pdf_xref_info` prints.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub version: PdfVersion,
    pub header_version: PdfVersion,
    pub file_size: u64,
    pub xref_offset: u64,
    pub has_xref_stream: bool,
    pub incremental_updates: usize,
    pub reconstructed: bool,
    pub encrypted: bool,
    pub load_on_demand: bool,
    pub strict: bool,
    pub xref_slots: usize,
    pub objects_loaded: usize,
    pub free_objects: Vec<Reference>,
    /// Trailer values in PDF syntax
    pub trailer: BTreeMap<String, String>,
}

/// Read the `%PDF-x.y` header at the start of `reader`.
///
/// ```
/// use std::io::Cursor;
/// use pdf_xref::document::parse_header;
/// use pdf_xref::version::PdfVersion;
///
/// let version = parse_header(&mut Cursor::new(b"%PDF-1.7\n".to_vec())).unwrap();
/// assert_eq!(version, PdfVersion::V1_7);
/// ```
pub fn parse_header<R: Read + Seek + ?Sized>(reader: &mut R) -> Result<PdfVersion> {
    reader.seek(SeekFrom::Start(0))?;
    let mut header = [0u8; 8];
    if read_up_to(reader, &mut header)? < header.len() || &header[..5] != b"%PDF-" {
        return Err(Error::NoPdfFile);
    }
    let version = String::from_utf8_lossy(&header[5..]);
    version.parse()
}

/// `/Size` must be a non-negative integer; a value below the number of
/// declared slots is only worth a warning.
fn check_trailer(trailer: &Dictionary, table: &XRefTable, strict: bool) -> Result<()> {
    if trailer.is_empty() {
        return Err(Error::NoTrailer);
    }
    match trailer.get_integer("Size") {
        Some(size) if size >= 0 => {
            if (size as u64) < table.len() as u64 {
                log::warn!("Trailer /Size {} is smaller than the {} XRef entries", size, table.len());
            }
        },
        _ => {
            let found = trailer
                .get("Size")
                .map_or_else(|| "missing".to_string(), |v| format!("{:?}", v));
            if strict {
                return Err(Error::InvalidTrailerSize(found));
            }
            log::warn!("Trailer /Size is not a non-negative integer: {}", found);
        },
    }
    Ok(())
}
