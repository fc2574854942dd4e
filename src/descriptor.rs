//! Class descriptors: the memoized wire-level summary of a registered
//! class, and the concurrent descriptor cache.

use crate::context::{fnv1a_32, resolve_type_id, IdMapper, MarshallerContext, FNV_SEED};
use crate::error::{MarshalError, Result};
use crate::registry::{ClassSpec, LoaderId, ReadObjectFn, SpecKind, WriteObjectFn};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Wire type tags. Values travel on the wire and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    /// The null value.
    Null = 0,
    /// Back-reference to an earlier object in the same stream.
    Handle = 1,
    /// Signed 8-bit integer.
    Byte = 2,
    /// Signed 16-bit integer.
    Short = 3,
    /// Signed 32-bit integer.
    Int = 4,
    /// Signed 64-bit integer.
    Long = 5,
    /// 32-bit floating point.
    Float = 6,
    /// 64-bit floating point.
    Double = 7,
    /// Unicode scalar value.
    Char = 8,
    /// Boolean value.
    Bool = 9,
    /// Array of bytes.
    ByteArr = 10,
    /// Array of shorts.
    ShortArr = 11,
    /// Array of ints.
    IntArr = 12,
    /// Array of longs.
    LongArr = 13,
    /// Array of floats.
    FloatArr = 14,
    /// Array of doubles.
    DoubleArr = 15,
    /// Array of chars.
    CharArr = 16,
    /// Array of booleans.
    BoolArr = 17,
    /// UTF-8 string.
    Str = 18,
    /// UUID value.
    Uuid = 19,
    /// Millisecond timestamp.
    Date = 20,
    /// Class literal.
    Cls = 21,
    /// Properties table.
    Props = 22,
    /// Resizable list.
    ArrayList = 23,
    /// Linked list.
    LinkedList = 24,
    /// Hash map.
    HashMap = 25,
    /// Hash set.
    HashSet = 26,
    /// Hash map with predictable iteration order.
    LinkedHashMap = 27,
    /// Hash set with predictable iteration order.
    LinkedHashSet = 28,
    /// Typed object array.
    ObjArr = 29,
    /// Enum constant.
    Enum = 30,
    /// Externalizable instance.
    Externalizable = 31,
    /// Marshal-aware instance.
    MarshalAware = 32,
    /// Reflectively-walked serializable instance.
    Serializable = 33,
}

impl TypeTag {
    /// Returns the wire value of this tag.
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Decodes a wire tag byte.
    pub fn from_u8(v: u8) -> Result<TypeTag> {
        Ok(match v {
            0 => Self::Null,
            1 => Self::Handle,
            2 => Self::Byte,
            3 => Self::Short,
            4 => Self::Int,
            5 => Self::Long,
            6 => Self::Float,
            7 => Self::Double,
            8 => Self::Char,
            9 => Self::Bool,
            10 => Self::ByteArr,
            11 => Self::ShortArr,
            12 => Self::IntArr,
            13 => Self::LongArr,
            14 => Self::FloatArr,
            15 => Self::DoubleArr,
            16 => Self::CharArr,
            17 => Self::BoolArr,
            18 => Self::Str,
            19 => Self::Uuid,
            20 => Self::Date,
            21 => Self::Cls,
            22 => Self::Props,
            23 => Self::ArrayList,
            24 => Self::LinkedList,
            25 => Self::HashMap,
            26 => Self::HashSet,
            27 => Self::LinkedHashMap,
            28 => Self::LinkedHashSet,
            29 => Self::ObjArr,
            30 => Self::Enum,
            31 => Self::Externalizable,
            32 => Self::MarshalAware,
            33 => Self::Serializable,
            other => {
                return Err(MarshalError::Protocol(format!(
                    "unknown type tag: {}",
                    other
                )))
            }
        })
    }
}

/// Kind of a declared field. The tag participates in schema checksums and
/// field metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldKind {
    /// `i8` field.
    Byte = 0,
    /// `i16` field.
    Short = 1,
    /// `i32` field.
    Int = 2,
    /// `i64` field.
    Long = 3,
    /// `f32` field.
    Float = 4,
    /// `f64` field.
    Double = 5,
    /// `char` field.
    Char = 6,
    /// `bool` field.
    Bool = 7,
    /// Any non-primitive field, written as a tagged value.
    Other = 8,
}

impl FieldKind {
    /// Returns the stable tag of this kind.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Decodes a field-kind tag.
    pub fn from_tag(v: u8) -> Result<FieldKind> {
        Ok(match v {
            0 => Self::Byte,
            1 => Self::Short,
            2 => Self::Int,
            3 => Self::Long,
            4 => Self::Float,
            5 => Self::Double,
            6 => Self::Char,
            7 => Self::Bool,
            8 => Self::Other,
            other => {
                return Err(MarshalError::Protocol(format!(
                    "unknown field kind: {}",
                    other
                )))
            }
        })
    }

    /// Returns the fixed wire size for primitive kinds, `None` for `Other`.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Byte | Self::Bool => Some(1),
            Self::Short => Some(2),
            Self::Int | Self::Float | Self::Char => Some(4),
            Self::Long | Self::Double => Some(8),
            Self::Other => None,
        }
    }
}

/// Field id: FNV-1a/32 over the field name, salted with the type id.
pub(crate) fn field_id(name: &str, type_id: i32) -> i32 {
    fnv1a_32(FNV_SEED ^ type_id as u32, name.as_bytes()) as i32
}

fn fold16(hash: u32) -> u16 {
    ((hash >> 16) ^ (hash & 0xffff)) as u16
}

/// One wire field of one hierarchy level.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    name: String,
    id: i32,
    kind: FieldKind,
    slot: Option<usize>,
}

impl FieldInfo {
    /// Returns the field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the salted field id.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the field kind.
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Returns the instance slot, or `None` for phantom override fields
    /// (zero-valued on write, ignored on read).
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }
}

/// Wire fields of one hierarchy level, sorted by name, plus the level's
/// custom hooks.
pub struct LevelFields {
    class: String,
    infos: Vec<FieldInfo>,
    by_name: HashMap<String, usize>,
    write_hook: Option<WriteObjectFn>,
    read_hook: Option<ReadObjectFn>,
}

impl LevelFields {
    /// Returns the class name of this level.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Returns the wire fields in wire (sorted) order.
    pub fn infos(&self) -> &[FieldInfo] {
        &self.infos
    }

    /// Looks up a wire field by name.
    pub fn info(&self, name: &str) -> Option<&FieldInfo> {
        self.by_name.get(name).map(|&i| &self.infos[i])
    }

    pub(crate) fn write_hook(&self) -> Option<&WriteObjectFn> {
        self.write_hook.as_ref()
    }

    pub(crate) fn read_hook(&self) -> Option<&ReadObjectFn> {
        self.read_hook.as_ref()
    }
}

impl fmt::Debug for LevelFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelFields")
            .field("class", &self.class)
            .field("fields", &self.infos.len())
            .field("has_write_hook", &self.write_hook.is_some())
            .field("has_read_hook", &self.read_hook.is_some())
            .finish()
    }
}

/// The full field table of a serializable class, base-class level first.
#[derive(Debug)]
pub struct Fields {
    levels: Vec<LevelFields>,
    indexing_supported: bool,
    wire_field_count: usize,
}

impl Fields {
    /// Returns the per-level field groups, base level first.
    pub fn levels(&self) -> &[LevelFields] {
        &self.levels
    }

    /// Whether footer-indexed field access is possible for this class:
    /// no custom hooks anywhere in the hierarchy and no duplicate field
    /// names across it.
    pub fn indexing_supported(&self) -> bool {
        self.indexing_supported
    }

    /// Total number of wire fields across all levels.
    pub fn wire_field_count(&self) -> usize {
        self.wire_field_count
    }

    /// Looks a wire field up by name, leaf-most level first.
    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.levels
            .iter()
            .rev()
            .find_map(|l| l.info(name))
            .map(|i| i.kind())
    }
}

/// Immutable wire-level summary of one registered class.
///
/// Derived once per `(loader, class)` and cached; concurrent lookups race
/// to install and losers discard their candidate.
pub struct ClassDescriptor {
    spec: Arc<ClassSpec>,
    tag: TypeTag,
    type_id: i32,
    wire_type_id: i32,
    checksum: u16,
    excluded: bool,
    fields: Option<Fields>,
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("class", &self.spec.name())
            .field("tag", &self.tag)
            .field("type_id", &self.type_id)
            .field("checksum", &self.checksum)
            .field("excluded", &self.excluded)
            .finish()
    }
}

impl ClassDescriptor {
    /// Builds a descriptor for a registered class.
    pub(crate) fn build(
        spec: Arc<ClassSpec>,
        ctx: &dyn MarshallerContext,
        mapper: Option<&dyn IdMapper>,
        exclusions: &HashSet<String>,
    ) -> Result<ClassDescriptor> {
        let name = spec.name().to_string();

        if exclusions.contains(&name) {
            return Ok(ClassDescriptor {
                spec,
                tag: TypeTag::Null,
                type_id: 0,
                wire_type_id: 0,
                checksum: 0,
                excluded: true,
                fields: None,
            });
        }

        let type_id = resolve_type_id(&name, mapper);
        let wire_type_id = if ctx.register_class(type_id, &name)? {
            type_id
        } else {
            0
        };

        let (tag, fields) = match spec.kind() {
            SpecKind::Enum(_) => (TypeTag::Enum, None),
            SpecKind::Externalizable(_) => (TypeTag::Externalizable, None),
            SpecKind::MarshalAware(_) => (TypeTag::MarshalAware, None),
            SpecKind::Serializable(ser) => {
                let mut seen: HashSet<&str> = HashSet::new();
                let mut indexing_supported = true;
                let mut levels = Vec::with_capacity(ser.levels.len());
                let mut wire_field_count = 0usize;

                for (li, level) in ser.levels.iter().enumerate() {
                    if level.write_object.is_some() || level.read_object.is_some() {
                        indexing_supported = false;
                    }
                    for f in &level.fields {
                        if !seen.insert(f.name.as_str()) {
                            indexing_supported = false;
                        }
                    }

                    let mut infos: Vec<FieldInfo> = match &level.persistent_override {
                        Some(declared) => {
                            let mut out = Vec::with_capacity(declared.len());
                            for pf in declared {
                                let slot = ser.layout.slot_at_level(li, &pf.name);
                                if let Some(idx) = slot {
                                    let physical = ser.layout.slots()[idx].kind;
                                    if physical != pf.kind {
                                        return Err(MarshalError::Configuration(format!(
                                            "persistent field '{}' of {} declares {:?} \
                                             but the physical field is {:?}",
                                            pf.name, level.class, pf.kind, physical
                                        )));
                                    }
                                }
                                out.push(FieldInfo {
                                    name: pf.name.clone(),
                                    id: 0,
                                    kind: pf.kind,
                                    slot,
                                });
                            }
                            out
                        }
                        None => level
                            .fields
                            .iter()
                            .filter(|f| !f.transient)
                            .map(|f| FieldInfo {
                                name: f.name.clone(),
                                id: 0,
                                kind: f.kind,
                                slot: ser.layout.slot_at_level(li, &f.name),
                            })
                            .collect(),
                    };

                    infos.sort_by(|a, b| a.name.cmp(&b.name));
                    for info in &mut infos {
                        info.id = field_id(&info.name, type_id);
                    }
                    wire_field_count += infos.len();

                    let by_name = infos
                        .iter()
                        .enumerate()
                        .map(|(i, f)| (f.name.clone(), i))
                        .collect();
                    levels.push(LevelFields {
                        class: level.class.clone(),
                        infos,
                        by_name,
                        write_hook: level.write_object.clone(),
                        read_hook: level.read_object.clone(),
                    });
                }

                (
                    TypeTag::Serializable,
                    Some(Fields {
                        levels,
                        indexing_supported,
                        wire_field_count,
                    }),
                )
            }
        };

        let mut hash = fnv1a_32(FNV_SEED, name.as_bytes());
        if let Some(fields) = &fields {
            if let Some(leaf) = fields.levels.last() {
                for info in leaf.infos().iter().filter(|i| i.slot.is_some()) {
                    hash = fnv1a_32(hash, info.name.as_bytes());
                    hash = fnv1a_32(hash, &[info.kind.tag()]);
                }
            }
        }
        let checksum = fold16(hash);

        tracing::debug!(class = %name, type_id, ?tag, "built class descriptor");

        Ok(ClassDescriptor {
            spec,
            tag,
            type_id,
            wire_type_id,
            checksum,
            excluded: false,
            fields,
        })
    }

    /// Returns the described class's spec.
    pub fn spec(&self) -> &Arc<ClassSpec> {
        &self.spec
    }

    /// Returns the class name.
    pub fn name(&self) -> &str {
        self.spec.name()
    }

    /// Returns the wire tag for instances of this class.
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Returns the resolved (never zero) type id.
    pub fn type_id(&self) -> i32 {
        self.type_id
    }

    /// Returns the id emitted on the wire: the resolved id, or `0` when the
    /// context declined registration and the name goes inline.
    pub fn wire_type_id(&self) -> i32 {
        self.wire_type_id
    }

    /// Returns the 16-bit schema checksum.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Whether the class is on the exclusion list.
    pub fn excluded(&self) -> bool {
        self.excluded
    }

    /// Whether the class is an enum.
    pub fn is_enum(&self) -> bool {
        self.tag == TypeTag::Enum
    }

    /// Whether the class formally declares the serializable capability.
    pub fn declares_serializable(&self) -> bool {
        self.spec
            .serializable_spec()
            .map(|s| s.declares_serializable)
            .unwrap_or(false)
    }

    /// Returns the field table for serializable classes.
    pub fn fields(&self) -> Option<&Fields> {
        self.fields.as_ref()
    }

    /// Whether footer-indexed access is possible for this class.
    pub fn fields_indexing_supported(&self) -> bool {
        self.fields
            .as_ref()
            .map(|f| f.indexing_supported())
            .unwrap_or(false)
    }

    /// Returns the loader of the registry the class came from.
    pub fn loader(&self) -> LoaderId {
        self.spec.loader()
    }
}

/// Concurrent `(loader, class) → descriptor` cache.
///
/// Hits are lock-free reads. On a miss the caller builds a candidate
/// outside the map and installs it with put-if-absent; a losing thread
/// discards its candidate and uses the installed one.
pub(crate) struct DescriptorCache {
    map: DashMap<(LoaderId, Arc<str>), Arc<ClassDescriptor>>,
}

impl DescriptorCache {
    pub(crate) fn new() -> DescriptorCache {
        DescriptorCache {
            map: DashMap::new(),
        }
    }

    /// Returns the descriptor for a class, building and installing it on
    /// first sight.
    pub(crate) fn resolve(
        &self,
        spec: Arc<ClassSpec>,
        ctx: &dyn MarshallerContext,
        mapper: Option<&dyn IdMapper>,
        exclusions: &HashSet<String>,
    ) -> Result<Arc<ClassDescriptor>> {
        let key = (spec.loader(), spec.name_arc());
        if let Some(found) = self.map.get(&key) {
            return Ok(found.value().clone());
        }
        let candidate = Arc::new(ClassDescriptor::build(spec, ctx, mapper, exclusions)?);
        Ok(self.map.entry(key).or_insert(candidate).value().clone())
    }

    /// Removes every descriptor loaded by `loader`; returns their type ids
    /// so dependent metadata can be dropped as well.
    pub(crate) fn remove_loader(&self, loader: LoaderId) -> Vec<i32> {
        let mut removed = Vec::new();
        self.map.retain(|key, desc| {
            if key.0 == loader {
                removed.push(desc.type_id());
                false
            } else {
                true
            }
        });
        removed
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}
