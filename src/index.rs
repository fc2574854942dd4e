//! Footer-indexed field access over raw serialized bytes, and the
//! process-wide field-schema metadata map.

use crate::descriptor::{field_id, ClassDescriptor, FieldKind, TypeTag};
use crate::error::{MarshalError, Result};
use crate::marshaller::Marshaller;
use crate::object::{FieldWriter, Obj, ObjRef};
use crate::registry::ClassResolver;
use crate::stream::{ByteDataInput, DataInput, ObjectInputStream, StreamContext};
use bytes::Bytes;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Field-name schema of one type: `(name, kind)` pairs in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    fields: Vec<(String, FieldKind)>,
}

impl FieldSchema {
    pub(crate) fn new(fields: Vec<(String, FieldKind)>) -> FieldSchema {
        FieldSchema { fields }
    }

    /// Returns the `(name, kind)` pairs in wire order.
    pub fn fields(&self) -> &[(String, FieldKind)] {
        &self.fields
    }

    /// Returns a field's kind.
    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, k)| *k)
    }

    /// Returns the field names in wire order.
    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|(n, _)| n.as_str()).collect()
    }
}

/// Process-wide `type id → field schema` map, letting consumers enumerate
/// field names without touching bytes.
#[derive(Default)]
pub struct MetadataHandler {
    schemas: DashMap<i32, Arc<FieldSchema>>,
}

impl MetadataHandler {
    /// Creates an empty metadata map.
    pub fn new() -> MetadataHandler {
        MetadataHandler {
            schemas: DashMap::new(),
        }
    }

    /// Returns the schema published for a type id.
    pub fn get(&self, type_id: i32) -> Option<Arc<FieldSchema>> {
        self.schemas.get(&type_id).map(|e| e.value().clone())
    }

    /// Publishes a schema for a type id; the first publication wins.
    pub fn publish(&self, type_id: i32, schema: FieldSchema) {
        self.schemas.entry(type_id).or_insert_with(|| Arc::new(schema));
    }

    pub(crate) fn remove(&self, type_id: i32) {
        self.schemas.remove(&type_id);
    }

    /// Returns the field names published for a type id.
    pub fn field_names(&self, type_id: i32) -> Option<Vec<String>> {
        self.get(type_id)
            .map(|s| s.fields().iter().map(|(n, _)| n.clone()).collect())
    }
}

impl fmt::Debug for MetadataHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataHandler")
            .field("schemas", &self.schemas.len())
            .finish()
    }
}

/// Enables footer emission for indexable classes and owns the metadata
/// map. Configure one on the marshaller to get `has_field`/`read_field`.
#[derive(Debug, Default)]
pub struct IndexingHandler {
    meta: MetadataHandler,
}

impl IndexingHandler {
    /// Creates a handler with an empty metadata map.
    pub fn new() -> IndexingHandler {
        IndexingHandler {
            meta: MetadataHandler::new(),
        }
    }

    /// Returns the metadata map.
    pub fn metadata(&self) -> &MetadataHandler {
        &self.meta
    }

    /// Reports whether the class supports indexing, publishing its field
    /// schema on first sight.
    pub(crate) fn enable_for(&self, desc: &ClassDescriptor) -> bool {
        match desc.fields() {
            Some(fields) if fields.indexing_supported() => {
                if self.meta.get(desc.type_id()).is_none() {
                    let schema = fields
                        .levels()
                        .iter()
                        .flat_map(|l| l.infos())
                        .map(|i| (i.name().to_string(), i.kind()))
                        .collect();
                    self.meta.publish(desc.type_id(), FieldSchema::new(schema));
                }
                true
            }
            _ => false,
        }
    }
}

/// Field writer that only records names and kinds, used to collect a
/// marshal-aware type's schema on its first write.
pub(crate) struct MetaCollector {
    fields: Vec<(String, FieldKind)>,
}

impl MetaCollector {
    pub(crate) fn new() -> MetaCollector {
        MetaCollector { fields: Vec::new() }
    }

    pub(crate) fn into_schema(self) -> FieldSchema {
        FieldSchema::new(self.fields)
    }

    fn record(&mut self, name: &str, kind: FieldKind) {
        self.fields.push((name.to_string(), kind));
    }
}

impl FieldWriter for MetaCollector {
    fn write_byte(&mut self, name: &str, _v: i8) -> Result<()> {
        self.record(name, FieldKind::Byte);
        Ok(())
    }

    fn write_short(&mut self, name: &str, _v: i16) -> Result<()> {
        self.record(name, FieldKind::Short);
        Ok(())
    }

    fn write_int(&mut self, name: &str, _v: i32) -> Result<()> {
        self.record(name, FieldKind::Int);
        Ok(())
    }

    fn write_long(&mut self, name: &str, _v: i64) -> Result<()> {
        self.record(name, FieldKind::Long);
        Ok(())
    }

    fn write_float(&mut self, name: &str, _v: f32) -> Result<()> {
        self.record(name, FieldKind::Float);
        Ok(())
    }

    fn write_double(&mut self, name: &str, _v: f64) -> Result<()> {
        self.record(name, FieldKind::Double);
        Ok(())
    }

    fn write_char(&mut self, name: &str, _v: char) -> Result<()> {
        self.record(name, FieldKind::Char);
        Ok(())
    }

    fn write_bool(&mut self, name: &str, _v: bool) -> Result<()> {
        self.record(name, FieldKind::Bool);
        Ok(())
    }

    fn write_obj(&mut self, name: &str, _v: &ObjRef) -> Result<()> {
        self.record(name, FieldKind::Other);
        Ok(())
    }
}

/// Context that callers pass to `read_field` to receive indexable fields
/// undecoded.
#[derive(Debug, Clone, Copy)]
pub struct CacheObjectContext {
    keep_binary: bool,
}

impl CacheObjectContext {
    /// Context that keeps indexable field values in binary form.
    pub fn new() -> CacheObjectContext {
        CacheObjectContext { keep_binary: true }
    }

    /// Controls whether indexable field values stay binary.
    pub fn with_keep_binary(mut self, keep_binary: bool) -> CacheObjectContext {
        self.keep_binary = keep_binary;
        self
    }

    pub(crate) fn keep_binary(&self) -> bool {
        self.keep_binary
    }
}

impl Default for CacheObjectContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A lazily-parsed field value extracted from a serialized blob.
///
/// Holds the enclosing blob (so stream-relative back-references inside the
/// value stay meaningful) plus the value's range. Parsing is deferred
/// until [`deserialize`](CacheObject::deserialize); nested `has_field` /
/// `read_field` work directly on the bytes.
#[derive(Debug, Clone)]
pub struct CacheObject {
    data: Bytes,
    off: usize,
    len: usize,
}

impl CacheObject {
    pub(crate) fn new(data: Bytes, off: usize, len: usize) -> CacheObject {
        CacheObject { data, off, len }
    }

    /// The value's serialized bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data[self.off..self.off + self.len]
    }

    /// Serialized length of the value.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the range is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fully deserializes the wrapped value.
    pub fn deserialize(
        &self,
        marshaller: &Marshaller,
        resolver: &dyn ClassResolver,
    ) -> Result<ObjRef> {
        marshaller.read_value_in(&self.data, self.off, resolver)
    }

    /// `has_field` over the wrapped value without parsing it.
    pub fn has_field(&self, marshaller: &Marshaller, name: &str) -> Result<bool> {
        marshaller.has_field(name, &self.data, self.off, self.len)
    }

    /// `read_field` over the wrapped value without parsing it.
    pub fn read_field(
        &self,
        marshaller: &Marshaller,
        name: &str,
        resolver: &dyn ClassResolver,
        ctx: Option<&CacheObjectContext>,
    ) -> Result<FieldResult> {
        marshaller.read_field(name, &self.data, self.off, self.len, resolver, ctx)
    }
}

/// Outcome of a `read_field` call.
#[derive(Debug)]
pub enum FieldResult {
    /// The field was decoded into a graph node.
    Value(ObjRef),
    /// The field is an indexable object and was kept binary.
    Raw(CacheObject),
}

impl FieldResult {
    /// Returns the decoded value, if any.
    pub fn as_value(&self) -> Option<&ObjRef> {
        match self {
            FieldResult::Value(v) => Some(v),
            FieldResult::Raw(_) => None,
        }
    }

    /// Returns the binary wrapper, if any.
    pub fn as_raw(&self) -> Option<&CacheObject> {
        match self {
            FieldResult::Raw(c) => Some(c),
            FieldResult::Value(_) => None,
        }
    }
}

/// Parsed footer of one indexed object.
struct IndexedBlob {
    desc: Arc<ClassDescriptor>,
    entries: Vec<(i32, u32)>,
    /// Object-relative offset of the footer's first entry.
    footer_rel: usize,
}

/// Parses the header and footer of `blob` if it is an indexed object;
/// returns `None` for anything without a footer.
fn parse_indexed_blob(blob: &[u8], cx: &StreamContext<'_>) -> Result<Option<IndexedBlob>> {
    let mut input = ByteDataInput::new(blob);
    let tag = match TypeTag::from_u8(input.read_u8()?) {
        Ok(tag @ (TypeTag::Serializable | TypeTag::MarshalAware)) => tag,
        Ok(_) => return Ok(None),
        Err(e) => return Err(e),
    };

    let wire_id = input.read_int()?;
    let name = if wire_id == 0 {
        input.read_string()?
    } else {
        cx.ctx
            .class_name(wire_id)?
            .ok_or_else(|| MarshalError::ClassNotFound(format!("type id {}", wire_id)))?
    };
    let desc = cx.descriptor(&name)?;

    let actual = input.read_u16()?;
    if actual != desc.checksum() {
        return Err(MarshalError::SchemaMismatch {
            class: name,
            expected: desc.checksum(),
            actual,
        });
    }

    let (footer_rel, footer_end) = match tag {
        TypeTag::Serializable => {
            if cx.idx.is_none() || !desc.fields_indexing_supported() {
                return Ok(None);
            }
            if blob.len() < input.position() + 4 {
                return Err(MarshalError::Protocol("blob too short for footer".to_string()));
            }
            input.set_position(blob.len() - 4)?;
            let footer_rel = input.read_u32()? as usize;
            (footer_rel, blob.len() - 4)
        }
        TypeTag::MarshalAware => {
            let body_len = input.read_u32()? as usize;
            let body_start = input.position();
            let body_end = body_start + body_len;
            if body_end > blob.len() || body_len < 4 {
                return Err(MarshalError::Protocol(
                    "marshal-aware body out of bounds".to_string(),
                ));
            }
            input.set_position(body_end - 4)?;
            let footer_rel = input.read_u32()? as usize;
            (footer_rel, body_end - 4)
        }
        _ => unreachable!("filtered above"),
    };

    if footer_rel > footer_end || (footer_end - footer_rel) % 8 != 0 {
        return Err(MarshalError::Protocol(
            "corrupt field index footer".to_string(),
        ));
    }

    input.set_position(footer_rel)?;
    let entry_count = (footer_end - footer_rel) / 8;
    let mut entries = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        let id = input.read_int()?;
        let rel = input.read_u32()?;
        entries.push((id, rel));
    }

    Ok(Some(IndexedBlob {
        desc,
        entries,
        footer_rel,
    }))
}

fn check_range(data: &[u8], off: usize, len: usize) -> Result<()> {
    if off.checked_add(len).map_or(true, |end| end > data.len()) {
        return Err(MarshalError::Protocol(format!(
            "blob range [{}, {}+{}) out of bounds (input is {} bytes)",
            off,
            off,
            len,
            data.len()
        )));
    }
    Ok(())
}

/// `has_field` over a raw blob: footer scan for the salted hash of `name`.
pub(crate) fn has_field(
    name: &str,
    data: &[u8],
    off: usize,
    len: usize,
    cx: &StreamContext<'_>,
) -> Result<bool> {
    check_range(data, off, len)?;
    let blob = &data[off..off + len];
    match parse_indexed_blob(blob, cx)? {
        Some(parsed) => {
            let id = field_id(name, parsed.desc.type_id());
            Ok(parsed.entries.iter().any(|(entry_id, _)| *entry_id == id))
        }
        None => Ok(false),
    }
}

/// `read_field` over a raw blob: footer lookup, then a single-value decode
/// at the recorded offset.
pub(crate) fn read_field(
    name: &str,
    data: &[u8],
    off: usize,
    len: usize,
    cx: &StreamContext<'_>,
    keep_binary: bool,
) -> Result<FieldResult> {
    check_range(data, off, len)?;
    let blob = &data[off..off + len];
    let parsed = parse_indexed_blob(blob, cx)?
        .ok_or_else(|| MarshalError::FieldNotFound(name.to_string()))?;

    let id = field_id(name, parsed.desc.type_id());
    let entry_idx = parsed
        .entries
        .iter()
        .position(|(entry_id, _)| *entry_id == id)
        .ok_or_else(|| MarshalError::FieldNotFound(name.to_string()))?;

    let value_start = parsed.entries[entry_idx].1 as usize;
    // Entries are recorded in write order; the next entry's value is
    // preceded by its 4-byte field id word.
    let value_end = match parsed.entries.get(entry_idx + 1) {
        Some((_, next_rel)) => (*next_rel as usize).checked_sub(4).ok_or_else(|| {
            MarshalError::Protocol("corrupt field index footer".to_string())
        })?,
        None => parsed.footer_rel,
    };
    if value_start >= value_end || value_end > blob.len() {
        return Err(MarshalError::Protocol(format!(
            "corrupt footer entry for field '{}'",
            name
        )));
    }

    let kind = parsed
        .desc
        .fields()
        .and_then(|f| f.kind_of(name))
        .or_else(|| {
            cx.idx
                .and_then(|h| h.metadata().get(parsed.desc.type_id()))
                .and_then(|s| s.kind_of(name))
        })
        .ok_or_else(|| {
            MarshalError::Protocol(format!(
                "no field metadata for type {} (field '{}')",
                parsed.desc.name(),
                name
            ))
        })?;

    if let Some(size) = kind.fixed_size() {
        let mut input = ByteDataInput::new(blob);
        input.set_position(value_start)?;
        let obj = match kind {
            FieldKind::Byte => Obj::Byte(input.read_byte()?),
            FieldKind::Short => Obj::Short(input.read_short()?),
            FieldKind::Int => Obj::Int(input.read_int()?),
            FieldKind::Long => Obj::Long(input.read_long()?),
            FieldKind::Float => Obj::Float(input.read_float()?),
            FieldKind::Double => Obj::Double(input.read_double()?),
            FieldKind::Char => Obj::Char(input.read_char()?),
            FieldKind::Bool => Obj::Bool(input.read_bool()?),
            FieldKind::Other => unreachable!("Other has no fixed size"),
        };
        debug_assert!(value_start + size <= value_end);
        return Ok(FieldResult::Value(obj.into_ref()));
    }

    // Object field: chase a leading handle word, if any, through the blob.
    let mut pos = value_start;
    let mut chased = false;
    let mut visited = std::collections::HashSet::new();
    loop {
        if pos >= blob.len() {
            return Err(MarshalError::Protocol(format!(
                "field '{}' offset out of bounds",
                name
            )));
        }
        if blob[pos] != TypeTag::Handle.value() {
            break;
        }
        if !visited.insert(pos) {
            return Err(MarshalError::Protocol("handle loop in field index".to_string()));
        }
        let mut input = ByteDataInput::new(blob);
        input.set_position(pos + 1)?;
        pos = input.read_u32()? as usize;
        chased = true;
    }

    if keep_binary && !chased {
        let sub = &blob[value_start..value_end];
        if parse_indexed_blob(sub, cx)?.is_some() {
            return Ok(FieldResult::Raw(CacheObject::new(
                Bytes::copy_from_slice(blob),
                value_start,
                value_end - value_start,
            )));
        }
    }

    let value = read_value_at(blob, pos, cx)?;
    Ok(FieldResult::Value(value))
}

/// Decodes one value at `pos` inside `data`, keeping stream-relative
/// handle positions meaningful. Back-references to positions that are not
/// decoded during this call fail with a protocol error.
pub(crate) fn read_value_at(data: &[u8], pos: usize, cx: &StreamContext<'_>) -> Result<ObjRef> {
    let mut stream = ObjectInputStream::new(data, *cx);
    stream.seek(pos)?;
    stream.read_object()
}
