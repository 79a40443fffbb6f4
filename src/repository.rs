//! Indirect object repository.
//!
//! Objects live in an arena of slots indexed by object number. A slot moves
//! `Pending -> Loading -> Loaded` exactly once; meeting a `Loading` slot (or a
//! stream payload in `Loading`) means a load re-entered itself and fails with
//! [`Error::CircularReference`] instead of recursing.
//!
//! The repository owns the [`ObjectSource`] that pending slots and stream
//! payloads are read from.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::io::{Seek, SeekFrom};

use bytes::Bytes;

use crate::encryption::{decrypt_strings, SecurityHandler};
use crate::error::{Error, Result};
use crate::object::{IndirectObject, Object, Reference, StreamPayload, MAX_GENERATION};
use crate::objstm::ObjectStream;
use crate::parser_config::ParserOptions;
use crate::tokenizer::{read_up_to, ReadSeek, Tokenizer};

/// State of one object number.
#[derive(Debug, Clone)]
enum Slot {
    /// Never declared
    Empty,
    Free { generation: u16 },
    /// In use at `offset`, not read yet
    Pending { offset: u64, generation: u16 },
    /// Inside an object stream that has not been expanded
    Compressed { stream_object: u32, index: u32 },
    Loading { generation: u16 },
    Loaded(Box<IndirectObject>),
}

/// Backing file of a parsed document.
pub struct ObjectSource {
    reader: Box<dyn ReadSeek>,
    tokenizer: Tokenizer,
    file_size: u64,
    strict: bool,
    max_decompressed_size: usize,
    security: Option<Box<dyn SecurityHandler>>,
    /// Object numbers never decrypted
    exempt: HashSet<u32>,
}

impl fmt::Debug for ObjectSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectSource")
            .field("file_size", &self.file_size)
            .field("strict", &self.strict)
            .field("security", &self.security)
            .field("exempt", &self.exempt)
            .finish_non_exhaustive()
    }
}

impl ObjectSource {
    pub fn new(reader: Box<dyn ReadSeek>, file_size: u64, options: &ParserOptions) -> Self {
        Self {
            reader,
            tokenizer: Tokenizer::new(),
            file_size,
            strict: options.strict,
            max_decompressed_size: options.max_decompressed_size,
            security: None,
            exempt: HashSet::new(),
        }
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Install an authenticated handler; strings and streams read afterwards
    /// are decrypted.
    pub fn set_security_handler(&mut self, handler: Box<dyn SecurityHandler>) {
        self.security = Some(handler);
    }

    pub fn security_handler(&self) -> Option<&dyn SecurityHandler> {
        self.security.as_deref()
    }

    /// Never decrypt object `object_number` (the `/Encrypt` dictionary).
    pub fn exempt_from_decryption(&mut self, object_number: u32) {
        self.exempt.insert(object_number);
    }

    fn decrypts(&self, reference: Reference, value: &Object) -> bool {
        self.security.is_some()
            && !self.exempt.contains(&reference.object_number)
            && value.as_dict().and_then(|d| d.get_name("Type")) != Some("XRef")
    }

    /// Read `N G obj` at `offset` and the value after it. A stream payload is
    /// left pending.
    fn read_indirect_object(&mut self, expected: Reference, offset: u64) -> Result<IndirectObject> {
        let reader = &mut *self.reader;
        reader.seek(SeekFrom::Start(offset))?;
        let header = self.tokenizer.read_object_header(reader)?;
        if header != expected {
            return Err(Error::NoObject {
                offset,
                reason: format!("expected object {}, found header of {}", expected, header),
            });
        }
        let value = self.tokenizer.read_object(reader)?;
        let payload_offset = match value {
            Object::Dictionary(_) => self.tokenizer.read_stream_start(reader)?,
            _ => None,
        };
        if payload_offset.is_none() && !self.tokenizer.try_read_keyword(reader, b"endobj")? {
            log::debug!("Object {} at offset {} has no endobj", expected, offset);
        }

        let decrypt = self.decrypts(expected, &value);
        let mut obj = match (value, payload_offset) {
            (Object::Dictionary(dict), Some(payload)) => IndirectObject::with_pending_stream(expected, dict, payload),
            (value, _) => IndirectObject::new(expected, value),
        };
        if decrypt {
            if let Some(handler) = self.security.as_deref() {
                decrypt_strings(handler, obj.value_mut(), expected)?;
            }
        }
        obj.reset_dirty();
        Ok(obj)
    }

    /// Read the raw payload of `reference` starting at `offset`.
    ///
    /// A declared length is trusted when `endstream` follows it. Otherwise
    /// lenient parsing measures up to the next `endstream`.
    fn read_payload(&mut self, reference: Reference, offset: u64, declared: Option<u64>) -> Result<Vec<u8>> {
        let usable = match declared {
            Some(len) if offset.saturating_add(len) <= self.file_size => self.endstream_at(offset + len)?,
            _ => false,
        };
        let checked = if usable {
            declared
        } else if self.strict {
            return Err(Error::InvalidStream(match declared {
                Some(len) => format!("/Length {} of {} is not followed by endstream", len, reference),
                None => format!("{} has no usable /Length", reference),
            }));
        } else {
            None
        };
        let length = match checked {
            Some(len) => len,
            None => {
                let measured = self
                    .tokenizer
                    .measure_stream(&mut *self.reader, offset)?
                    .ok_or_else(|| Error::InvalidStream(format!("no endstream after payload of {}", reference)))?;
                log::warn!(
                    "Stream {} /Length {:?} unusable; measured {} bytes up to endstream",
                    reference,
                    declared,
                    measured
                );
                measured
            },
        };

        let length = usize::try_from(length)
            .map_err(|_| Error::ValueOutOfRange(format!("stream length {} of {}", length, reference)))?;
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; length];
        if read_up_to(&mut *self.reader, &mut data)? < length {
            return Err(Error::UnexpectedEof);
        }
        Ok(data)
    }

    fn endstream_at(&mut self, position: u64) -> Result<bool> {
        self.reader.seek(SeekFrom::Start(position))?;
        self.tokenizer.try_read_keyword(&mut *self.reader, b"endstream")
    }
}

/// Every indirect object of one document, keyed by object number.
pub struct IndirectObjectRepository {
    slots: Vec<Slot>,
    /// Sorted; always headed by `0 65535 R`
    free_list: Vec<Reference>,
    /// Numbers whose generation is exhausted
    unavailable: BTreeSet<u32>,
    source: Option<ObjectSource>,
}

impl fmt::Debug for IndirectObjectRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndirectObjectRepository")
            .field("slots", &self.slots.len())
            .field("loaded", &self.object_count())
            .field("free", &self.free_list.len())
            .field("source", &self.source)
            .finish()
    }
}

impl Default for IndirectObjectRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl IndirectObjectRepository {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: vec![Reference::new(0, MAX_GENERATION)],
            unavailable: BTreeSet::new(),
            source: None,
        }
    }

    /// Repository that loads pending objects from `source`.
    pub fn with_source(source: ObjectSource) -> Self {
        Self {
            source: Some(source),
            ..Self::new()
        }
    }

    pub fn source(&self) -> Option<&ObjectSource> {
        self.source.as_ref()
    }

    pub fn source_mut(&mut self) -> Option<&mut ObjectSource> {
        self.source.as_mut()
    }

    fn slot_mut(&mut self, object_number: u32) -> &mut Slot {
        let index = object_number as usize;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, Slot::Empty);
        }
        &mut self.slots[index]
    }

    /// Record an in-use object at `offset`, read on first access.
    pub(crate) fn insert_pending(&mut self, reference: Reference, offset: u64) {
        *self.slot_mut(reference.object_number) = Slot::Pending {
            offset,
            generation: reference.generation,
        };
    }

    /// Record an object stored in object stream `stream_object`.
    pub(crate) fn insert_compressed(&mut self, object_number: u32, stream_object: u32, index: u32) {
        *self.slot_mut(object_number) = Slot::Compressed { stream_object, index };
    }

    /// Register a materialized object under its own reference, replacing any
    /// placeholder and taking the number off the free list.
    pub fn push_object(&mut self, obj: IndirectObject) {
        let reference = obj.indirect_reference();
        if reference.object_number == 0 {
            log::warn!("Refusing to store object 0, the head of the free list");
            return;
        }
        self.free_list.retain(|r| r.object_number != reference.object_number);
        *self.slot_mut(reference.object_number) = Slot::Loaded(Box::new(obj));
    }

    /// Mark `reference` free and add it to the free list.
    pub fn add_free_object(&mut self, reference: Reference) {
        match self.free_list.binary_search(&reference) {
            Ok(_) => log::debug!("{} is already on the free list", reference),
            Err(pos) => self.free_list.insert(pos, reference),
        }
        if reference.object_number > 0 {
            *self.slot_mut(reference.object_number) = Slot::Free {
                generation: reference.generation,
            };
        }
    }

    /// Like [`add_free_object`](Self::add_free_object) but idempotent and
    /// ignoring object 0. An exhausted generation retires the number instead.
    pub fn safe_add_free_object(&mut self, reference: Reference) {
        if reference.object_number == 0 {
            return;
        }
        if matches!(self.slots.get(reference.object_number as usize), Some(Slot::Free { .. })) {
            return;
        }
        if reference.generation >= MAX_GENERATION {
            log::debug!("Object {} has no generation left; never reused", reference.object_number);
            self.unavailable.insert(reference.object_number);
            *self.slot_mut(reference.object_number) = Slot::Free {
                generation: reference.generation,
            };
            return;
        }
        self.add_free_object(reference);
    }

    /// Free list in ascending order, headed by `0 65535 R`.
    pub fn free_objects(&self) -> &[Reference] {
        &self.free_list
    }

    pub fn is_unavailable(&self, object_number: u32) -> bool {
        self.unavailable.contains(&object_number)
    }

    /// Reference to use for a new object: the lowest reusable free entry, else
    /// the first number past the end.
    pub fn next_free_object(&self) -> Reference {
        self.free_list
            .iter()
            .find(|r| r.object_number > 0 && !self.unavailable.contains(&r.object_number))
            .copied()
            .unwrap_or_else(|| Reference::new(self.slots.len().max(1) as u32, 0))
    }

    pub fn is_free(&self, object_number: u32) -> bool {
        matches!(self.slots.get(object_number as usize), Some(Slot::Free { .. }))
    }

    /// Number of materialized objects.
    pub fn object_count(&self) -> usize {
        self.slots.iter().filter(|s| matches!(s, Slot::Loaded(_))).count()
    }

    /// Materialized objects in object number order.
    pub fn iter(&self) -> impl Iterator<Item = &IndirectObject> + '_ {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Loaded(obj) => Some(&**obj),
            _ => None,
        })
    }

    /// Object numbers still waiting in an object stream, with their container.
    pub(crate) fn compressed_objects(&self) -> Vec<(u32, u32)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(n, slot)| match slot {
                Slot::Compressed { stream_object, .. } => Some((n as u32, *stream_object)),
                _ => None,
            })
            .collect()
    }

    /// Load the object at `reference` if needed. `Ok(false)` when nothing in
    /// use lives there under that generation.
    fn materialize(&mut self, reference: Reference) -> Result<bool> {
        let index = reference.object_number as usize;
        match self.slots.get(index) {
            None | Some(Slot::Empty) | Some(Slot::Free { .. }) => Ok(false),
            Some(Slot::Loaded(obj)) => Ok(obj.indirect_reference().generation == reference.generation),
            Some(Slot::Loading { .. }) => Err(Error::CircularReference(reference)),
            Some(&Slot::Pending { offset, generation }) => {
                if generation != reference.generation {
                    return Ok(false);
                }
                let source = self.source.as_mut().ok_or_else(|| Error::NoObject {
                    offset,
                    reason: format!("no source to load {} from", reference),
                })?;
                self.slots[index] = Slot::Loading { generation };
                log::debug!("Loading {} from offset {}", reference, offset);
                match source.read_indirect_object(reference, offset) {
                    Ok(obj) => {
                        self.slots[index] = Slot::Loaded(Box::new(obj));
                        Ok(true)
                    },
                    Err(e) => {
                        self.slots[index] = Slot::Pending { offset, generation };
                        Err(e)
                    },
                }
            },
            Some(&Slot::Compressed { stream_object, .. }) => {
                if reference.generation != 0 {
                    return Ok(false);
                }
                self.expand_object_stream(stream_object)?;
                Ok(matches!(self.slots.get(index), Some(Slot::Loaded(_))))
            },
        }
    }

    fn loaded(&self, reference: Reference) -> Option<&IndirectObject> {
        match self.slots.get(reference.object_number as usize) {
            Some(Slot::Loaded(obj)) if obj.indirect_reference().generation == reference.generation => Some(obj),
            _ => None,
        }
    }

    /// Resolve `reference`, loading it on first access.
    ///
    /// `Ok(None)` for free, undeclared and generation-mismatched references;
    /// an error when the object exists but cannot be read.
    pub fn resolve(&mut self, reference: Reference) -> Result<Option<&IndirectObject>> {
        if !self.materialize(reference)? {
            return Ok(None);
        }
        Ok(self.loaded(reference))
    }

    /// Mutable form of [`resolve`](Self::resolve).
    pub fn resolve_mut(&mut self, reference: Reference) -> Result<Option<&mut IndirectObject>> {
        if !self.materialize(reference)? {
            return Ok(None);
        }
        match self.slots.get_mut(reference.object_number as usize) {
            Some(Slot::Loaded(obj)) if obj.indirect_reference().generation == reference.generation => {
                Ok(Some(&mut **obj))
            },
            _ => Ok(None),
        }
    }

    /// Look up `reference`. Failures are logged and reported as `None`.
    pub fn get_indirect_object(&mut self, reference: Reference) -> Option<&IndirectObject> {
        if let Err(e) = self.materialize(reference) {
            log::warn!("Cannot resolve {}: {}", reference, e);
            return None;
        }
        self.loaded(reference)
    }

    pub fn get_indirect_object_mut(&mut self, reference: Reference) -> Option<&mut IndirectObject> {
        match self.resolve_mut(reference) {
            Ok(obj) => obj,
            Err(e) => {
                log::warn!("Cannot resolve {}: {}", reference, e);
                None
            },
        }
    }

    /// Follow one level of reference. A reference to nothing is `null`.
    pub fn dereference(&mut self, value: &Object) -> Result<Object> {
        match value {
            Object::Reference(r) => Ok(self.resolve(*r)?.map_or(Object::Null, |obj| obj.value().clone())),
            direct => Ok(direct.clone()),
        }
    }

    /// Read the stream payload of `reference` if it is still pending.
    ///
    /// An indirect `/Length` is resolved through the repository first. The
    /// payload is decrypted unless the object is exempt or an XRef stream.
    pub fn load_stream(&mut self, reference: Reference) -> Result<()> {
        if !self.materialize(reference)? {
            return Err(Error::InvalidStream(format!("{} does not resolve to an object", reference)));
        }
        let index = reference.object_number as usize;
        let (offset, length, decrypt) = match &self.slots[index] {
            Slot::Loaded(obj) => match obj.stream_payload() {
                None | Some(StreamPayload::Loaded(_)) => return Ok(()),
                Some(StreamPayload::Loading) => return Err(Error::CircularReference(reference)),
                Some(&StreamPayload::Pending { offset }) => {
                    let decrypt = self.source.as_ref().is_some_and(|s| s.decrypts(reference, obj.value()));
                    (offset, obj.dictionary()?.get("Length").cloned(), decrypt)
                },
            },
            _ => return Ok(()),
        };

        self.set_payload(index, StreamPayload::Loading);
        match self.read_stream(reference, offset, length, decrypt) {
            Ok(data) => {
                self.set_payload(index, StreamPayload::Loaded(Bytes::from(data)));
                Ok(())
            },
            Err(e) => {
                self.set_payload(index, StreamPayload::Pending { offset });
                Err(e)
            },
        }
    }

    fn set_payload(&mut self, index: usize, payload: StreamPayload) {
        if let Some(Slot::Loaded(obj)) = self.slots.get_mut(index) {
            obj.set_stream_payload(payload);
        }
    }

    fn read_stream(&mut self, reference: Reference, offset: u64, length: Option<Object>, decrypt: bool) -> Result<Vec<u8>> {
        let declared = match length {
            Some(Object::Reference(length_ref)) => self.resolve_length(length_ref)?,
            Some(value) => value.as_integer().and_then(|v| u64::try_from(v).ok()),
            None => None,
        };
        let source = self.source.as_mut().ok_or_else(|| Error::NoObject {
            offset,
            reason: format!("no source to read the stream of {} from", reference),
        })?;
        let data = source.read_payload(reference, offset, declared)?;
        match source.security.as_deref() {
            Some(handler) if decrypt => handler.decrypt_stream(&data, reference),
            _ => Ok(data),
        }
    }

    /// Value of an indirect `/Length`. Only re-entrance is fatal; anything else
    /// unusable leaves the length unknown.
    fn resolve_length(&mut self, length_ref: Reference) -> Result<Option<u64>> {
        match self.resolve(length_ref) {
            Ok(Some(obj)) => {
                if matches!(obj.stream_payload(), Some(StreamPayload::Loading)) {
                    return Err(Error::CircularReference(length_ref));
                }
                Ok(obj.value().as_integer().and_then(|v| u64::try_from(v).ok()))
            },
            Ok(None) => Ok(None),
            Err(e @ Error::CircularReference(_)) => Err(e),
            Err(e) => {
                log::warn!("Cannot resolve stream length {}: {}", length_ref, e);
                Ok(None)
            },
        }
    }

    /// Raw (still filter-encoded) payload of the stream at `reference`.
    pub fn stream_data(&mut self, reference: Reference) -> Result<Option<Bytes>> {
        self.load_stream(reference)?;
        Ok(self.loaded(reference).and_then(|obj| obj.stream_data().cloned()))
    }

    /// Detached deep copy of `reference`, with its stream payload read first.
    pub fn copy_object(&mut self, reference: Reference) -> Result<IndirectObject> {
        self.load_stream(reference)?;
        let obj = self
            .loaded(reference)
            .ok_or_else(|| Error::InvalidStream(format!("{} does not resolve to an object", reference)))?;
        obj.try_copy(reference)
    }

    /// Materialize every object still waiting in object stream `container`.
    pub fn expand_object_stream(&mut self, container: u32) -> Result<()> {
        let waiting: Vec<(u32, u32)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(n, slot)| match *slot {
                Slot::Compressed { stream_object, index } if stream_object == container => Some((n as u32, index)),
                _ => None,
            })
            .collect();
        if waiting.is_empty() {
            return Ok(());
        }
        for &(number, _) in &waiting {
            self.slots[number as usize] = Slot::Loading { generation: 0 };
        }

        let result = self.open_object_stream(container);
        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                for &(number, index) in &waiting {
                    self.slots[number as usize] = Slot::Compressed {
                        stream_object: container,
                        index,
                    };
                }
                return Err(e);
            },
        };

        for (number, index) in waiting {
            let parsed = stream
                .position_of(number, Some(index))
                .ok_or_else(|| Error::NoObject {
                    offset: 0,
                    reason: format!("object {} is not in object stream {}", number, stream.reference()),
                })
                .and_then(|position| stream.object_at(position));
            match parsed {
                Ok((_, value)) => {
                    let mut obj = IndirectObject::new(Reference::new(number, 0), value);
                    obj.reset_dirty();
                    self.slots[number as usize] = Slot::Loaded(Box::new(obj));
                },
                Err(e) => {
                    log::warn!("Dropping compressed object {}: {}", number, e);
                    self.slots[number as usize] = Slot::Empty;
                },
            }
        }
        Ok(())
    }

    fn open_object_stream(&mut self, container: u32) -> Result<ObjectStream> {
        let reference = match self.slots.get(container as usize) {
            Some(&Slot::Pending { generation, .. }) => Reference::new(container, generation),
            Some(Slot::Loaded(obj)) => obj.indirect_reference(),
            Some(Slot::Compressed { .. }) => {
                return Err(Error::InvalidXRef(format!(
                    "object stream {} is itself compressed",
                    container
                )))
            },
            Some(Slot::Loading { generation }) => {
                return Err(Error::CircularReference(Reference::new(container, *generation)))
            },
            _ => {
                return Err(Error::InvalidXRef(format!(
                    "object stream {} is not an object in use",
                    container
                )))
            },
        };
        self.load_stream(reference)?;
        let max = self.source.as_ref().map_or(0, |s| s.max_decompressed_size);
        let obj = self
            .loaded(reference)
            .ok_or_else(|| Error::InvalidXRef(format!("object stream {} did not load", reference)))?;
        ObjectStream::parse(obj, max)
    }
}
