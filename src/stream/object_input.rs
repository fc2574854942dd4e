//! The object read path: tag dispatch, constructor-bypassing instance
//! allocation, handle resolution, and hook views.

use super::data_input::{ByteDataInput, DataInput};
use super::StreamContext;
use crate::descriptor::{field_id, ClassDescriptor, FieldKind, TypeTag};
use crate::error::{MarshalError, Result};
use crate::object::{
    AwareObj, EnumObj, ExternObj, FieldReader, FieldSlot, FieldValue, LinkedMapObj, MapObj, Obj,
    ObjArr, ObjRef, PropsObj, SetObj, StructObj,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// The read path of one unmarshal invocation.
pub(crate) struct ObjectInputStream<'a> {
    input: ByteDataInput<'a>,
    cx: StreamContext<'a>,
    handles: HashMap<u32, ObjRef>,
}

impl<'a> ObjectInputStream<'a> {
    pub(crate) fn new(data: &'a [u8], cx: StreamContext<'a>) -> ObjectInputStream<'a> {
        ObjectInputStream {
            input: ByteDataInput::new(data),
            cx,
            handles: HashMap::new(),
        }
    }

    /// Moves the cursor; used when decoding a single value out of a larger
    /// blob.
    pub(crate) fn seek(&mut self, pos: usize) -> Result<()> {
        self.input.set_position(pos)
    }

    /// Reads one top-level object.
    pub(crate) fn read_object(&mut self) -> Result<ObjRef> {
        self.read_value()
    }

    fn read_len(&mut self) -> Result<usize> {
        let v = self.input.read_int()?;
        if v < 0 {
            return Err(MarshalError::Protocol(format!("invalid length: {}", v)));
        }
        Ok(v as usize)
    }

    /// Reads type-id metadata: a nonzero id resolved through the context,
    /// or id 0 followed by the inline name.
    fn read_name_meta(&mut self) -> Result<String> {
        let wire_id = self.input.read_int()?;
        if wire_id == 0 {
            self.input.read_string()
        } else {
            self.cx
                .ctx
                .class_name(wire_id)?
                .ok_or_else(|| MarshalError::ClassNotFound(format!("type id {}", wire_id)))
        }
    }

    fn register(&mut self, pos: u32, obj: ObjRef) -> ObjRef {
        self.handles.insert(pos, obj.clone());
        obj
    }

    fn verify_checksum(&mut self, desc: &ClassDescriptor) -> Result<()> {
        let actual = self.input.read_u16()?;
        if actual != desc.checksum() {
            return Err(MarshalError::SchemaMismatch {
                class: desc.name().to_string(),
                expected: desc.checksum(),
                actual,
            });
        }
        Ok(())
    }

    /// Reads one value. The object is entered into the handle table before
    /// its children are read, so cyclic references resolve.
    pub(crate) fn read_value(&mut self) -> Result<ObjRef> {
        let pos = self.input.position() as u32;
        let tag = TypeTag::from_u8(self.input.read_u8()?)?;
        match tag {
            TypeTag::Null => Ok(Obj::null()),
            TypeTag::Handle => {
                let target = self.input.read_u32()?;
                self.handles.get(&target).cloned().ok_or_else(|| {
                    MarshalError::Protocol(format!(
                        "handle to unwritten position {}",
                        target
                    ))
                })
            }
            TypeTag::Byte => {
                let v = self.input.read_byte()?;
                Ok(self.register(pos, Obj::Byte(v).into_ref()))
            }
            TypeTag::Short => {
                let v = self.input.read_short()?;
                Ok(self.register(pos, Obj::Short(v).into_ref()))
            }
            TypeTag::Int => {
                let v = self.input.read_int()?;
                Ok(self.register(pos, Obj::Int(v).into_ref()))
            }
            TypeTag::Long => {
                let v = self.input.read_long()?;
                Ok(self.register(pos, Obj::Long(v).into_ref()))
            }
            TypeTag::Float => {
                let v = self.input.read_float()?;
                Ok(self.register(pos, Obj::Float(v).into_ref()))
            }
            TypeTag::Double => {
                let v = self.input.read_double()?;
                Ok(self.register(pos, Obj::Double(v).into_ref()))
            }
            TypeTag::Char => {
                let v = self.input.read_char()?;
                Ok(self.register(pos, Obj::Char(v).into_ref()))
            }
            TypeTag::Bool => {
                let v = self.input.read_bool()?;
                Ok(self.register(pos, Obj::Bool(v).into_ref()))
            }
            TypeTag::Str => {
                let v = self.input.read_string()?;
                Ok(self.register(pos, Obj::Str(v).into_ref()))
            }
            TypeTag::Uuid => {
                let hi = self.input.read_long()? as u64;
                let lo = self.input.read_long()? as u64;
                Ok(self.register(pos, Obj::Uuid(Uuid::from_u64_pair(hi, lo)).into_ref()))
            }
            TypeTag::Date => {
                let millis = self.input.read_long()?;
                Ok(self.register(pos, Obj::Date(millis).into_ref()))
            }
            TypeTag::Cls => {
                let name = self.read_name_meta()?;
                Ok(self.register(pos, Obj::Class(name).into_ref()))
            }
            TypeTag::ByteArr => {
                let n = self.read_len()?;
                let mut xs = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    xs.push(self.input.read_byte()?);
                }
                Ok(self.register(pos, Obj::ByteArr(xs).into_ref()))
            }
            TypeTag::ShortArr => {
                let n = self.read_len()?;
                let mut xs = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    xs.push(self.input.read_short()?);
                }
                Ok(self.register(pos, Obj::ShortArr(xs).into_ref()))
            }
            TypeTag::IntArr => {
                let n = self.read_len()?;
                let mut xs = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    xs.push(self.input.read_int()?);
                }
                Ok(self.register(pos, Obj::IntArr(xs).into_ref()))
            }
            TypeTag::LongArr => {
                let n = self.read_len()?;
                let mut xs = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    xs.push(self.input.read_long()?);
                }
                Ok(self.register(pos, Obj::LongArr(xs).into_ref()))
            }
            TypeTag::FloatArr => {
                let n = self.read_len()?;
                let mut xs = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    xs.push(self.input.read_float()?);
                }
                Ok(self.register(pos, Obj::FloatArr(xs).into_ref()))
            }
            TypeTag::DoubleArr => {
                let n = self.read_len()?;
                let mut xs = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    xs.push(self.input.read_double()?);
                }
                Ok(self.register(pos, Obj::DoubleArr(xs).into_ref()))
            }
            TypeTag::CharArr => {
                let n = self.read_len()?;
                let mut xs = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    xs.push(self.input.read_char()?);
                }
                Ok(self.register(pos, Obj::CharArr(xs).into_ref()))
            }
            TypeTag::BoolArr => {
                let n = self.read_len()?;
                let mut xs = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    xs.push(self.input.read_bool()?);
                }
                Ok(self.register(pos, Obj::BoolArr(xs).into_ref()))
            }
            TypeTag::ObjArr => {
                let component = self.read_name_meta()?;
                let n = self.read_len()?;
                let r = self.register(
                    pos,
                    Obj::ObjArr(ObjArr {
                        component,
                        elems: Vec::with_capacity(n.min(4096)),
                    })
                    .into_ref(),
                );
                for _ in 0..n {
                    let v = self.read_value()?;
                    if let Obj::ObjArr(arr) = &mut *r.borrow_mut() {
                        arr.elems.push(v);
                    }
                }
                Ok(r)
            }
            TypeTag::ArrayList => {
                let n = self.read_len()?;
                let r = self.register(pos, Obj::ArrayList(Vec::with_capacity(n.min(4096))).into_ref());
                for _ in 0..n {
                    let v = self.read_value()?;
                    if let Obj::ArrayList(xs) = &mut *r.borrow_mut() {
                        xs.push(v);
                    }
                }
                Ok(r)
            }
            TypeTag::LinkedList => {
                let n = self.read_len()?;
                let r = self.register(pos, Obj::LinkedList(Vec::with_capacity(n.min(4096))).into_ref());
                for _ in 0..n {
                    let v = self.read_value()?;
                    if let Obj::LinkedList(xs) = &mut *r.borrow_mut() {
                        xs.push(v);
                    }
                }
                Ok(r)
            }
            TypeTag::HashMap => {
                let n = self.read_len()?;
                let load_factor = self.input.read_float()?;
                let r = self.register(
                    pos,
                    Obj::HashMap(MapObj {
                        load_factor,
                        entries: Vec::with_capacity(n.min(4096)),
                    })
                    .into_ref(),
                );
                for _ in 0..n {
                    let k = self.read_value()?;
                    let v = self.read_value()?;
                    if let Obj::HashMap(map) = &mut *r.borrow_mut() {
                        map.entries.push((k, v));
                    }
                }
                Ok(r)
            }
            TypeTag::LinkedHashMap => {
                let n = self.read_len()?;
                let load_factor = self.input.read_float()?;
                let access_order = self.input.read_bool()?;
                let r = self.register(
                    pos,
                    Obj::LinkedHashMap(LinkedMapObj {
                        load_factor,
                        access_order,
                        entries: Vec::with_capacity(n.min(4096)),
                    })
                    .into_ref(),
                );
                for _ in 0..n {
                    let k = self.read_value()?;
                    let v = self.read_value()?;
                    if let Obj::LinkedHashMap(map) = &mut *r.borrow_mut() {
                        map.entries.push((k, v));
                    }
                }
                Ok(r)
            }
            TypeTag::HashSet | TypeTag::LinkedHashSet => {
                let n = self.read_len()?;
                let load_factor = self.input.read_float()?;
                let set = SetObj {
                    load_factor,
                    items: Vec::with_capacity(n.min(4096)),
                };
                let obj = if tag == TypeTag::HashSet {
                    Obj::HashSet(set)
                } else {
                    Obj::LinkedHashSet(set)
                };
                let r = self.register(pos, obj.into_ref());
                for _ in 0..n {
                    let v = self.read_value()?;
                    match &mut *r.borrow_mut() {
                        Obj::HashSet(s) | Obj::LinkedHashSet(s) => s.items.push(v),
                        _ => unreachable!("registered as a set above"),
                    }
                }
                Ok(r)
            }
            TypeTag::Props => {
                let n = self.read_len()?;
                let r = self.register(pos, Obj::Properties(PropsObj::default()).into_ref());
                let defaults = self.read_value()?;
                {
                    let mut guard = r.borrow_mut();
                    if let Obj::Properties(props) = &mut *guard {
                        props.defaults = if defaults.borrow().is_null() {
                            None
                        } else {
                            Some(defaults)
                        };
                    }
                }
                for _ in 0..n {
                    let k = self.input.read_string()?;
                    let v = self.input.read_string()?;
                    if let Obj::Properties(props) = &mut *r.borrow_mut() {
                        props.entries.push((k, v));
                    }
                }
                Ok(r)
            }
            TypeTag::Enum => self.read_enum(pos),
            TypeTag::Externalizable => self.read_externalizable(pos),
            TypeTag::MarshalAware => self.read_marshal_aware(pos),
            TypeTag::Serializable => self.read_serializable(pos),
        }
    }

    fn classed_descriptor(&mut self, expected: TypeTag) -> Result<(String, Arc<ClassDescriptor>)> {
        let name = self.read_name_meta()?;
        let desc = self.cx.descriptor(&name)?;
        if desc.tag() != expected {
            return Err(MarshalError::Protocol(format!(
                "wire tag {:?} does not match registered kind {:?} of {}",
                expected,
                desc.tag(),
                name
            )));
        }
        Ok((name, desc))
    }

    fn read_enum(&mut self, pos: u32) -> Result<ObjRef> {
        let (name, desc) = self.classed_descriptor(TypeTag::Enum)?;
        let ordinal = self.input.read_int()?;
        let constants = desc
            .spec()
            .enum_constants()
            .expect("enum descriptor has constants");
        if ordinal < 0 || ordinal as usize >= constants.len() {
            return Err(MarshalError::Protocol(format!(
                "enum ordinal {} out of range for {} ({} constants)",
                ordinal,
                name,
                constants.len()
            )));
        }
        Ok(self.register(
            pos,
            Obj::Enum(EnumObj {
                class: name,
                ordinal,
            })
            .into_ref(),
        ))
    }

    fn read_externalizable(&mut self, pos: u32) -> Result<ObjRef> {
        let (name, desc) = self.classed_descriptor(TypeTag::Externalizable)?;
        self.verify_checksum(&desc)?;
        let ctor = desc
            .spec()
            .extern_ctor()
            .expect("externalizable descriptor has constructor")
            .clone();
        // Externalizable reconstruction is the exception to constructor
        // bypass: the registered no-arg constructor runs here.
        let body = ctor();
        let r = self.register(pos, Obj::Extern(ExternObj { class: name, body }).into_ref());
        {
            let mut guard = r.borrow_mut();
            if let Obj::Extern(ext) = &mut *guard {
                let mut view = ObjectInput {
                    stream: &mut *self,
                    frame: None,
                };
                ext.body.read_external(&mut view)?;
            }
        }
        self.apply_read_resolve(pos, r, &desc)
    }

    fn read_marshal_aware(&mut self, pos: u32) -> Result<ObjRef> {
        let (name, desc) = self.classed_descriptor(TypeTag::MarshalAware)?;
        self.verify_checksum(&desc)?;
        let body_len = self.input.read_u32()? as usize;
        let body_start = self.input.position();
        let body_end = body_start + body_len;
        if body_end > self.input.len() || body_len < 4 {
            return Err(MarshalError::Protocol(format!(
                "marshal-aware body of {} out of bounds",
                name
            )));
        }
        let obj_start = pos as usize;

        self.input.set_position(body_end - 4)?;
        let footer_start_rel = self.input.read_u32()? as usize;
        let footer_abs = obj_start + footer_start_rel;
        if footer_abs < body_start
            || footer_abs > body_end - 4
            || (body_end - 4 - footer_abs) % 8 != 0
        {
            return Err(MarshalError::Protocol(format!(
                "corrupt field index footer in marshal-aware body of {}",
                name
            )));
        }
        self.input.set_position(footer_abs)?;
        let entry_count = (body_end - 4 - footer_abs) / 8;
        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let id = self.input.read_int()?;
            let rel = self.input.read_u32()?;
            entries.push((id, rel));
        }

        let ctor = desc
            .spec()
            .aware_ctor()
            .expect("marshal-aware descriptor has constructor")
            .clone();
        let body = ctor();
        let r = self.register(pos, Obj::Aware(AwareObj { class: name, body }).into_ref());
        {
            let mut guard = r.borrow_mut();
            if let Obj::Aware(aware) = &mut *guard {
                let mut reader = AwareReader {
                    stream: &mut *self,
                    type_id: desc.type_id(),
                    obj_start,
                    entries,
                };
                aware.body.read_fields(&mut reader)?;
            }
        }
        self.input.set_position(body_end)?;
        self.apply_read_resolve(pos, r, &desc)
    }

    fn read_serializable(&mut self, pos: u32) -> Result<ObjRef> {
        let (name, desc) = self.classed_descriptor(TypeTag::Serializable)?;
        self.verify_checksum(&desc)?;

        let instance = Obj::Struct(StructObj::zeroed(desc.spec().clone())?).into_ref();
        let r = self.register(pos, instance);

        let indexing = self.cx.idx.is_some() && desc.fields_indexing_supported();
        let obj_start = pos as usize;
        let level_count = desc
            .fields()
            .map(|f| f.levels().len())
            .expect("serializable descriptor has fields");

        for level_idx in 0..level_count {
            let hook = desc.fields().expect("serializable descriptor has fields").levels()[level_idx]
                .read_hook()
                .cloned();
            match hook {
                Some(hook) => {
                    let mut view = ObjectInput {
                        stream: &mut *self,
                        frame: Some(ReadFrame {
                            instance: r.clone(),
                            desc: desc.clone(),
                            level: level_idx,
                        }),
                    };
                    hook(&r, &mut view)?;
                }
                None => self.read_level_default(&r, &desc, level_idx, indexing)?,
            }
        }

        if indexing {
            let footer_start = self.input.position();
            let entry_count = desc.fields().expect("serializable descriptor has fields").wire_field_count();
            self.input.set_position(footer_start + 8 * entry_count)?;
            let trailer = self.input.read_u32()? as usize;
            if obj_start + trailer != footer_start {
                return Err(MarshalError::Protocol(format!(
                    "corrupt field index footer for {}",
                    name
                )));
            }
        }

        self.apply_read_resolve(pos, r, &desc)
    }

    fn apply_read_resolve(
        &mut self,
        pos: u32,
        obj: ObjRef,
        desc: &Arc<ClassDescriptor>,
    ) -> Result<ObjRef> {
        if let Some(resolve) = desc.spec().read_resolve().cloned() {
            let resolved = resolve(&obj)?;
            self.handles.insert(pos, resolved.clone());
            return Ok(resolved);
        }
        Ok(obj)
    }

    /// Populates one level's fields exactly symmetric to the default
    /// write walk.
    fn read_level_default(
        &mut self,
        instance: &ObjRef,
        desc: &Arc<ClassDescriptor>,
        level_idx: usize,
        indexing: bool,
    ) -> Result<()> {
        let info_count = desc.fields().expect("serializable descriptor has fields").levels()[level_idx].infos().len();
        for info_idx in 0..info_count {
            let (expected_id, kind, slot) = {
                let info = &desc.fields().expect("serializable descriptor has fields").levels()[level_idx].infos()[info_idx];
                (info.id(), info.kind(), info.slot())
            };
            if indexing {
                let id = self.input.read_int()?;
                if id != expected_id {
                    return Err(MarshalError::Protocol(format!(
                        "field id mismatch in {}: expected {}, found {}",
                        desc.name(),
                        expected_id,
                        id
                    )));
                }
            }
            match slot {
                Some(slot_idx) => {
                    let value = match kind {
                        FieldKind::Byte => FieldSlot::Byte(self.input.read_byte()?),
                        FieldKind::Short => FieldSlot::Short(self.input.read_short()?),
                        FieldKind::Int => FieldSlot::Int(self.input.read_int()?),
                        FieldKind::Long => FieldSlot::Long(self.input.read_long()?),
                        FieldKind::Float => FieldSlot::Float(self.input.read_float()?),
                        FieldKind::Double => FieldSlot::Double(self.input.read_double()?),
                        FieldKind::Char => FieldSlot::Char(self.input.read_char()?),
                        FieldKind::Bool => FieldSlot::Bool(self.input.read_bool()?),
                        FieldKind::Other => FieldSlot::Other(self.read_value()?),
                    };
                    let mut guard = instance.borrow_mut();
                    let s = guard.as_struct_mut().ok_or_else(|| {
                        MarshalError::Protocol(format!(
                            "instance of {} is not a struct",
                            desc.name()
                        ))
                    })?;
                    s.set_slot(slot_idx, value);
                }
                // Phantom override field: consume and discard.
                None => match kind.fixed_size() {
                    Some(n) => self.input.skip(n)?,
                    None => {
                        let _ = self.read_value()?;
                    }
                },
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
struct ReadFrame {
    instance: ObjRef,
    desc: Arc<ClassDescriptor>,
    level: usize,
}

/// Stream view handed to `read_object`-style hooks and
/// [`Externalizable::read_external`](crate::object::Externalizable).
pub struct ObjectInput<'s, 'a> {
    stream: &'s mut ObjectInputStream<'a>,
    frame: Option<ReadFrame>,
}

impl ObjectInput<'_, '_> {
    /// Reads a value with full handle and descriptor routing.
    pub fn read_value(&mut self) -> Result<ObjRef> {
        self.stream.read_value()
    }

    /// Populates the enclosing level's fields exactly as the default read
    /// walk would. Only valid inside a `read_object` hook.
    pub fn default_read_fields(&mut self) -> Result<()> {
        let frame = self.frame.clone().ok_or_else(|| {
            MarshalError::Protocol("default_read_fields outside a serializable level".to_string())
        })?;
        self.stream
            .read_level_default(&frame.instance, &frame.desc, frame.level, false)
    }

    /// Decodes the enclosing level's field sequence into a name→value map
    /// without touching the instance, serving by-name access out of the
    /// remaining wire bytes.
    pub fn read_fields(&mut self) -> Result<FieldMap> {
        let frame = self.frame.clone().ok_or_else(|| {
            MarshalError::Protocol("read_fields outside a serializable level".to_string())
        })?;
        let info_count = frame.desc.fields().expect("serializable descriptor has fields").levels()[frame.level]
            .infos()
            .len();
        let mut entries = Vec::with_capacity(info_count);
        for info_idx in 0..info_count {
            let (name, kind) = {
                let info = &frame.desc.fields().expect("serializable descriptor has fields").levels()[frame.level].infos()[info_idx];
                (info.name().to_string(), info.kind())
            };
            let value = match kind {
                FieldKind::Byte => FieldValue::Byte(self.stream.input.read_byte()?),
                FieldKind::Short => FieldValue::Short(self.stream.input.read_short()?),
                FieldKind::Int => FieldValue::Int(self.stream.input.read_int()?),
                FieldKind::Long => FieldValue::Long(self.stream.input.read_long()?),
                FieldKind::Float => FieldValue::Float(self.stream.input.read_float()?),
                FieldKind::Double => FieldValue::Double(self.stream.input.read_double()?),
                FieldKind::Char => FieldValue::Char(self.stream.input.read_char()?),
                FieldKind::Bool => FieldValue::Bool(self.stream.input.read_bool()?),
                FieldKind::Other => FieldValue::Obj(self.stream.read_value()?),
            };
            entries.push((name, value));
        }
        Ok(FieldMap { entries })
    }
}

impl DataInput for ObjectInput<'_, '_> {
    fn read_byte(&mut self) -> Result<i8> {
        self.stream.input.read_byte()
    }

    fn read_bool(&mut self) -> Result<bool> {
        self.stream.input.read_bool()
    }

    fn read_short(&mut self) -> Result<i16> {
        self.stream.input.read_short()
    }

    fn read_int(&mut self) -> Result<i32> {
        self.stream.input.read_int()
    }

    fn read_long(&mut self) -> Result<i64> {
        self.stream.input.read_long()
    }

    fn read_float(&mut self) -> Result<f32> {
        self.stream.input.read_float()
    }

    fn read_double(&mut self) -> Result<f64> {
        self.stream.input.read_double()
    }

    fn read_char(&mut self) -> Result<char> {
        self.stream.input.read_char()
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.stream.input.read_bytes(len)
    }

    fn read_string(&mut self) -> Result<String> {
        self.stream.input.read_string()
    }
}

/// Decoded field sequence of one hierarchy level, for by-name access in
/// `read_object` hooks.
#[derive(Debug)]
pub struct FieldMap {
    entries: Vec<(String, FieldValue)>,
}

impl FieldMap {
    /// Returns a field's decoded value.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Returns all decoded fields in wire order.
    pub fn entries(&self) -> &[(String, FieldValue)] {
        &self.entries
    }
}

/// Footer-driven field reader for marshal-aware bodies: named reads seek
/// to the recorded offset, so reads may come in any order.
struct AwareReader<'s, 'a> {
    stream: &'s mut ObjectInputStream<'a>,
    type_id: i32,
    obj_start: usize,
    entries: Vec<(i32, u32)>,
}

impl AwareReader<'_, '_> {
    fn seek_field(&mut self, name: &str) -> Result<()> {
        let id = field_id(name, self.type_id);
        let rel = self
            .entries
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, rel)| *rel)
            .ok_or_else(|| MarshalError::FieldNotFound(name.to_string()))?;
        self.stream.input.set_position(self.obj_start + rel as usize)
    }
}

impl FieldReader for AwareReader<'_, '_> {
    fn read_byte(&mut self, name: &str) -> Result<i8> {
        self.seek_field(name)?;
        self.stream.input.read_byte()
    }

    fn read_short(&mut self, name: &str) -> Result<i16> {
        self.seek_field(name)?;
        self.stream.input.read_short()
    }

    fn read_int(&mut self, name: &str) -> Result<i32> {
        self.seek_field(name)?;
        self.stream.input.read_int()
    }

    fn read_long(&mut self, name: &str) -> Result<i64> {
        self.seek_field(name)?;
        self.stream.input.read_long()
    }

    fn read_float(&mut self, name: &str) -> Result<f32> {
        self.seek_field(name)?;
        self.stream.input.read_float()
    }

    fn read_double(&mut self, name: &str) -> Result<f64> {
        self.seek_field(name)?;
        self.stream.input.read_double()
    }

    fn read_char(&mut self, name: &str) -> Result<char> {
        self.seek_field(name)?;
        self.stream.input.read_char()
    }

    fn read_bool(&mut self, name: &str) -> Result<bool> {
        self.seek_field(name)?;
        self.stream.input.read_bool()
    }

    fn read_obj(&mut self, name: &str) -> Result<ObjRef> {
        self.seek_field(name)?;
        self.stream.read_value()
    }
}
