//! PDF object value model.
//!
//! Values form a tree by ownership: arrays and dictionaries own their
//! children, while links between indirect objects are [`Reference`] values
//! resolved through the [`crate::repository::IndirectObjectRepository`].
//! Containers remember the indirect object they belong to as a plain
//! [`Reference`] key and carry a dirty flag that every mutating method sets.

use crate::error::{Error, Result};
use bytes::Bytes;
use indexmap::IndexMap;
use serde::Serialize;
use std::borrow::Borrow;
use std::fmt;

/// Generation given to free slots synthesized for object numbers no XRef
/// section declared.
pub const FIRST_GENERATION: u16 = 1;

/// Highest generation number. A free entry with this generation is never reused.
pub const MAX_GENERATION: u16 = 65535;

/// Indirect reference `N G R`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Reference {
    /// Object number
    pub object_number: u32,
    /// Generation number
    pub generation: u16,
}

impl Reference {
    /// Create a new reference.
    pub fn new(object_number: u32, generation: u16) -> Self {
        Self {
            object_number,
            generation,
        }
    }

    /// False only for the `0 0 R` sentinel.
    pub fn is_indirect(&self) -> bool {
        self.object_number != 0 || self.generation != 0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.object_number, self.generation)
    }
}

/// The nine kinds of PDF value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ObjectKind {
    Null,
    Bool,
    Number,
    String,
    Name,
    Array,
    Dictionary,
    Reference,
    RawData,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// PDF name, stored without the leading slash and with `#xx` escapes decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(String);

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        Name(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name(s.to_string())
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Name(s)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

/// Integer or real number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Real(f64),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::Integer(i) => i as f64,
            Number::Real(r) => r,
        }
    }
}

/// Byte string together with the syntax it was written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfString {
    bytes: Vec<u8>,
    hex: bool,
}

impl PdfString {
    /// Literal `( ... )` string.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            hex: false,
        }
    }

    /// Hexadecimal `< ... >` string.
    pub fn hex(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            hex: true,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_hex(&self) -> bool {
        self.hex
    }

    pub(crate) fn set_bytes(&mut self, bytes: Vec<u8>) {
        self.bytes = bytes;
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Bytes written verbatim when marshaled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawData(pub Bytes);

/// Ordered `Name -> Object` mapping.
///
/// Insertion order is kept so marshaling is deterministic. Equality compares
/// entries only.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: IndexMap<Name, Object>,
    parent: Option<Reference>,
    dirty: bool,
}

impl PartialEq for Dictionary {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Object> {
        self.entries.get(key)
    }

    /// Mutable access to a value. Marks the dictionary dirty.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Object> {
        let value = self.entries.get_mut(key)?;
        self.dirty = true;
        Some(value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace `key`, returning the previous value.
    pub fn set(&mut self, key: impl Into<Name>, value: impl Into<Object>) -> Option<Object> {
        let mut value = value.into();
        value.set_parent(self.parent);
        self.dirty = true;
        self.entries.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Object> {
        let removed = self.entries.shift_remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &Object)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(Name::as_str)
    }

    pub fn get_integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Object::as_integer)
    }

    pub fn get_name(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Object::as_name)
    }

    pub fn get_reference(&self, key: &str) -> Option<Reference> {
        self.get(key).and_then(Object::as_reference)
    }

    /// Indirect object this dictionary belongs to.
    pub fn parent(&self) -> Option<Reference> {
        self.parent
    }

    /// Set the owning indirect object on this dictionary and every nested container.
    pub fn set_parent(&mut self, parent: Option<Reference>) {
        self.parent = parent;
        for value in self.entries.values_mut() {
            value.set_parent(parent);
        }
    }

    /// True when this dictionary or any nested container was mutated.
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.entries.values().any(Object::is_dirty)
    }

    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn reset_dirty(&mut self) {
        self.dirty = false;
        for value in self.entries.values_mut() {
            value.reset_dirty();
        }
    }

    /// Detached copy: no parent, clean.
    pub fn deep_copy(&self) -> Dictionary {
        Dictionary {
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.deep_copy()))
                .collect(),
            parent: None,
            dirty: false,
        }
    }
}

impl<K: Into<Name>, V: Into<Object>> FromIterator<(K, V)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Dictionary {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            parent: None,
            dirty: false,
        }
    }
}

/// Ordered sequence of objects.
#[derive(Debug, Clone, Default)]
pub struct Array {
    items: Vec<Object>,
    parent: Option<Reference>,
    dirty: bool,
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Object> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Object> {
        let value = self.items.get_mut(index)?;
        self.dirty = true;
        Some(value)
    }

    pub fn push(&mut self, value: impl Into<Object>) {
        let mut value = value.into();
        value.set_parent(self.parent);
        self.dirty = true;
        self.items.push(value);
    }

    pub fn remove(&mut self, index: usize) -> Option<Object> {
        if index >= self.items.len() {
            return None;
        }
        self.dirty = true;
        Some(self.items.remove(index))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Object> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Object] {
        &self.items
    }

    pub fn parent(&self) -> Option<Reference> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<Reference>) {
        self.parent = parent;
        for value in &mut self.items {
            value.set_parent(parent);
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty || self.items.iter().any(Object::is_dirty)
    }

    pub fn reset_dirty(&mut self) {
        self.dirty = false;
        for value in &mut self.items {
            value.reset_dirty();
        }
    }

    pub fn deep_copy(&self) -> Array {
        Array {
            items: self.items.iter().map(Object::deep_copy).collect(),
            parent: None,
            dirty: false,
        }
    }
}

impl<V: Into<Object>> FromIterator<V> for Array {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Array {
            items: iter.into_iter().map(Into::into).collect(),
            parent: None,
            dirty: false,
        }
    }
}

/// PDF value.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Null,
    Bool(bool),
    Number(Number),
    String(PdfString),
    Name(Name),
    Array(Array),
    Dictionary(Dictionary),
    Reference(Reference),
    RawData(RawData),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Null => ObjectKind::Null,
            Object::Bool(_) => ObjectKind::Bool,
            Object::Number(_) => ObjectKind::Number,
            Object::String(_) => ObjectKind::String,
            Object::Name(_) => ObjectKind::Name,
            Object::Array(_) => ObjectKind::Array,
            Object::Dictionary(_) => ObjectKind::Dictionary,
            Object::Reference(_) => ObjectKind::Reference,
            Object::RawData(_) => ObjectKind::RawData,
        }
    }

    /// Deep copy detached from any owning indirect object, with dirty flags cleared.
    pub fn deep_copy(&self) -> Object {
        match self {
            Object::Array(a) => Object::Array(a.deep_copy()),
            Object::Dictionary(d) => Object::Dictionary(d.deep_copy()),
            other => other.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Number(Number::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value of an integer or real.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Object::Number(n) => Some(n.as_f64()),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(n) => Some(n.as_str()),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&PdfString> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Object::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Array> {
        match self {
            Object::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Object::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut Dictionary> {
        match self {
            Object::Dictionary(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<Reference> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Narrow to a dictionary or fail with [`Error::InvalidDataType`].
    pub fn dictionary(&self) -> Result<&Dictionary> {
        match self {
            Object::Dictionary(d) => Ok(d),
            other => Err(other.type_error(ObjectKind::Dictionary)),
        }
    }

    pub fn dictionary_mut(&mut self) -> Result<&mut Dictionary> {
        match self {
            Object::Dictionary(d) => Ok(d),
            other => Err(other.type_error(ObjectKind::Dictionary)),
        }
    }

    pub(crate) fn type_error(&self, expected: ObjectKind) -> Error {
        Error::InvalidDataType {
            expected: expected.to_string(),
            found: self.kind().to_string(),
        }
    }

    pub fn set_parent(&mut self, parent: Option<Reference>) {
        match self {
            Object::Array(a) => a.set_parent(parent),
            Object::Dictionary(d) => d.set_parent(parent),
            _ => {},
        }
    }

    pub fn parent(&self) -> Option<Reference> {
        match self {
            Object::Array(a) => a.parent(),
            Object::Dictionary(d) => d.parent(),
            _ => None,
        }
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            Object::Array(a) => a.is_dirty(),
            Object::Dictionary(d) => d.is_dirty(),
            _ => false,
        }
    }

    pub fn reset_dirty(&mut self) {
        match self {
            Object::Array(a) => a.reset_dirty(),
            Object::Dictionary(d) => d.reset_dirty(),
            _ => {},
        }
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Object::Bool(b)
    }
}

impl From<i64> for Object {
    fn from(i: i64) -> Self {
        Object::Number(Number::Integer(i))
    }
}

impl From<i32> for Object {
    fn from(i: i32) -> Self {
        Object::Number(Number::Integer(i as i64))
    }
}

impl From<u32> for Object {
    fn from(i: u32) -> Self {
        Object::Number(Number::Integer(i as i64))
    }
}

impl From<f64> for Object {
    fn from(r: f64) -> Self {
        Object::Number(Number::Real(r))
    }
}

impl From<Name> for Object {
    fn from(n: Name) -> Self {
        Object::Name(n)
    }
}

impl From<PdfString> for Object {
    fn from(s: PdfString) -> Self {
        Object::String(s)
    }
}

impl From<Reference> for Object {
    fn from(r: Reference) -> Self {
        Object::Reference(r)
    }
}

impl From<Dictionary> for Object {
    fn from(d: Dictionary) -> Self {
        Object::Dictionary(d)
    }
}

impl From<Array> for Object {
    fn from(a: Array) -> Self {
        Object::Array(a)
    }
}

/// Load status of a stream payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPayload {
    /// Payload starts at `offset` (first byte after `stream` EOL) and has not been read.
    Pending { offset: u64 },
    /// Payload is being read; seeing this again means the load re-entered itself.
    Loading,
    /// Payload bytes, decrypted but still filter-encoded.
    Loaded(Bytes),
}

/// Object with its own `N G obj` identity, optionally carrying a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct IndirectObject {
    reference: Reference,
    value: Object,
    stream: Option<StreamPayload>,
    dirty: bool,
}

impl IndirectObject {
    pub fn new(reference: Reference, mut value: Object) -> Self {
        value.set_parent(Some(reference));
        Self {
            reference,
            value,
            stream: None,
            dirty: false,
        }
    }

    /// Stream object with a loaded payload.
    pub fn with_stream(reference: Reference, dict: Dictionary, data: impl Into<Bytes>) -> Self {
        let mut obj = Self::new(reference, Object::Dictionary(dict));
        obj.stream = Some(StreamPayload::Loaded(data.into()));
        obj
    }

    pub(crate) fn with_pending_stream(reference: Reference, dict: Dictionary, offset: u64) -> Self {
        let mut obj = Self::new(reference, Object::Dictionary(dict));
        obj.stream = Some(StreamPayload::Pending { offset });
        obj
    }

    /// This object's own reference.
    pub fn indirect_reference(&self) -> Reference {
        self.reference
    }

    pub fn kind(&self) -> ObjectKind {
        self.value.kind()
    }

    pub fn value(&self) -> &Object {
        &self.value
    }

    /// Mutable access to the value. Marks the object dirty.
    pub fn value_mut(&mut self) -> &mut Object {
        self.dirty = true;
        &mut self.value
    }

    pub fn dictionary(&self) -> Result<&Dictionary> {
        self.value.dictionary()
    }

    pub fn is_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream_payload(&self) -> Option<&StreamPayload> {
        self.stream.as_ref()
    }

    pub(crate) fn stream_payload_mut(&mut self) -> Option<&mut StreamPayload> {
        self.stream.as_mut()
    }

    /// Loaded payload bytes. `None` for non-streams and payloads not read yet.
    pub fn stream_data(&self) -> Option<&Bytes> {
        match &self.stream {
            Some(StreamPayload::Loaded(data)) => Some(data),
            _ => None,
        }
    }

    pub fn has_pending_stream(&self) -> bool {
        matches!(self.stream, Some(StreamPayload::Pending { .. }))
    }

    /// Replace the payload. Marks the object dirty.
    pub fn set_stream_data(&mut self, data: impl Into<Bytes>) {
        self.stream = Some(StreamPayload::Loaded(data.into()));
        self.dirty = true;
    }

    pub(crate) fn set_stream_payload(&mut self, payload: StreamPayload) {
        self.stream = Some(payload);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty || self.value.is_dirty()
    }

    pub fn reset_dirty(&mut self) {
        self.dirty = false;
        self.value.reset_dirty();
    }

    /// Detached copy under `reference`. The stream payload must already be loaded.
    pub fn try_copy(&self, reference: Reference) -> Result<IndirectObject> {
        let stream = match &self.stream {
            None => None,
            Some(StreamPayload::Loaded(data)) => Some(StreamPayload::Loaded(data.clone())),
            Some(_) => {
                return Err(Error::InvalidStream(format!(
                    "cannot copy {} before its stream is loaded",
                    self.reference
                )))
            },
        };
        let mut copy = IndirectObject::new(reference, self.value.deep_copy());
        copy.stream = stream;
        Ok(copy)
    }
}
