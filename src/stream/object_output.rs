//! The object write path: tagged-value emission with handle tracking,
//! descriptor-driven field walks, and footer-indexed payloads.

use super::data_output::{ByteDataOutput, DataOutput};
use super::StreamContext;
use crate::descriptor::{field_id, ClassDescriptor, FieldKind, TypeTag};
use crate::error::{MarshalError, Result};
use crate::index::MetaCollector;
use crate::object::{FieldSlot, FieldWriter, Obj, ObjRef};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// The write path of one marshal invocation.
///
/// Owns no state of its own: the buffer and the identity→position handle
/// table come from the acquired stream handle, the configuration from the
/// marshaller.
pub(crate) struct ObjectOutputStream<'a> {
    out: &'a mut ByteDataOutput,
    handles: &'a mut HashMap<usize, u32>,
    cx: StreamContext<'a>,
}

impl<'a> ObjectOutputStream<'a> {
    pub(crate) fn new(
        out: &'a mut ByteDataOutput,
        handles: &'a mut HashMap<usize, u32>,
        cx: StreamContext<'a>,
    ) -> ObjectOutputStream<'a> {
        ObjectOutputStream { out, handles, cx }
    }

    /// Writes one top-level object.
    pub(crate) fn write_object(&mut self, obj: &ObjRef) -> Result<()> {
        self.write_value(obj)
    }

    fn write_tag(&mut self, tag: TypeTag) -> Result<()> {
        self.out.write_u8(tag.value())
    }

    /// Emits the type-id metadata block of a descriptor.
    fn write_desc_meta(&mut self, desc: &ClassDescriptor) -> Result<()> {
        self.out.write_int(desc.wire_type_id())?;
        if desc.wire_type_id() == 0 {
            self.out.write_string(desc.name())?;
        }
        Ok(())
    }

    /// Emits type-id metadata for a bare class name (class literals and
    /// object-array components).
    fn write_name_meta(&mut self, name: &str) -> Result<()> {
        let wire_id = self.cx.wire_id_for_name(name)?;
        self.out.write_int(wire_id)?;
        if wire_id == 0 {
            self.out.write_string(name)?;
        }
        Ok(())
    }

    /// Writes one value: null fast path, handle back-reference, or a
    /// tagged payload registered in the handle table.
    pub(crate) fn write_value(&mut self, obj: &ObjRef) -> Result<()> {
        if obj.borrow().is_null() {
            return self.write_tag(TypeTag::Null);
        }
        let key = Rc::as_ptr(obj) as usize;
        if let Some(&pos) = self.handles.get(&key) {
            self.write_tag(TypeTag::Handle)?;
            return self.out.write_u32(pos);
        }
        let class_name = obj.borrow().class_name().map(str::to_string);
        match class_name {
            Some(name) => self.write_classed(obj, key, &name),
            None => {
                let pos = self.out.position() as u32;
                self.handles.insert(key, pos);
                self.write_builtin(obj)
            }
        }
    }

    /// Fast paths for the built-in kinds. The caller has already
    /// registered the object in the handle table.
    fn write_builtin(&mut self, obj: &ObjRef) -> Result<()> {
        // The borrow is held across recursive element writes; write-side
        // borrows are all immutable, so re-entry on cycles is fine.
        let b = obj.borrow();
        match &*b {
            Obj::Byte(v) => {
                self.write_tag(TypeTag::Byte)?;
                self.out.write_byte(*v)
            }
            Obj::Short(v) => {
                self.write_tag(TypeTag::Short)?;
                self.out.write_short(*v)
            }
            Obj::Int(v) => {
                self.write_tag(TypeTag::Int)?;
                self.out.write_int(*v)
            }
            Obj::Long(v) => {
                self.write_tag(TypeTag::Long)?;
                self.out.write_long(*v)
            }
            Obj::Float(v) => {
                self.write_tag(TypeTag::Float)?;
                self.out.write_float(*v)
            }
            Obj::Double(v) => {
                self.write_tag(TypeTag::Double)?;
                self.out.write_double(*v)
            }
            Obj::Char(v) => {
                self.write_tag(TypeTag::Char)?;
                self.out.write_char(*v)
            }
            Obj::Bool(v) => {
                self.write_tag(TypeTag::Bool)?;
                self.out.write_bool(*v)
            }
            Obj::Str(s) => {
                self.write_tag(TypeTag::Str)?;
                self.out.write_string(s)
            }
            Obj::Uuid(u) => {
                self.write_tag(TypeTag::Uuid)?;
                let (hi, lo) = u.as_u64_pair();
                self.out.write_long(hi as i64)?;
                self.out.write_long(lo as i64)
            }
            Obj::Date(millis) => {
                self.write_tag(TypeTag::Date)?;
                self.out.write_long(*millis)
            }
            Obj::Class(name) => {
                self.write_tag(TypeTag::Cls)?;
                self.write_name_meta(name)
            }
            Obj::ByteArr(xs) => {
                self.write_tag(TypeTag::ByteArr)?;
                self.out.write_int(xs.len() as i32)?;
                for v in xs {
                    self.out.write_byte(*v)?;
                }
                Ok(())
            }
            Obj::ShortArr(xs) => {
                self.write_tag(TypeTag::ShortArr)?;
                self.out.write_int(xs.len() as i32)?;
                for v in xs {
                    self.out.write_short(*v)?;
                }
                Ok(())
            }
            Obj::IntArr(xs) => {
                self.write_tag(TypeTag::IntArr)?;
                self.out.write_int(xs.len() as i32)?;
                for v in xs {
                    self.out.write_int(*v)?;
                }
                Ok(())
            }
            Obj::LongArr(xs) => {
                self.write_tag(TypeTag::LongArr)?;
                self.out.write_int(xs.len() as i32)?;
                for v in xs {
                    self.out.write_long(*v)?;
                }
                Ok(())
            }
            Obj::FloatArr(xs) => {
                self.write_tag(TypeTag::FloatArr)?;
                self.out.write_int(xs.len() as i32)?;
                for v in xs {
                    self.out.write_float(*v)?;
                }
                Ok(())
            }
            Obj::DoubleArr(xs) => {
                self.write_tag(TypeTag::DoubleArr)?;
                self.out.write_int(xs.len() as i32)?;
                for v in xs {
                    self.out.write_double(*v)?;
                }
                Ok(())
            }
            Obj::CharArr(xs) => {
                self.write_tag(TypeTag::CharArr)?;
                self.out.write_int(xs.len() as i32)?;
                for v in xs {
                    self.out.write_char(*v)?;
                }
                Ok(())
            }
            Obj::BoolArr(xs) => {
                self.write_tag(TypeTag::BoolArr)?;
                self.out.write_int(xs.len() as i32)?;
                for v in xs {
                    self.out.write_bool(*v)?;
                }
                Ok(())
            }
            Obj::ObjArr(arr) => {
                self.write_tag(TypeTag::ObjArr)?;
                self.write_name_meta(&arr.component)?;
                self.out.write_int(arr.elems.len() as i32)?;
                for e in &arr.elems {
                    self.write_value(e)?;
                }
                Ok(())
            }
            Obj::ArrayList(xs) => {
                self.write_tag(TypeTag::ArrayList)?;
                self.out.write_int(xs.len() as i32)?;
                for e in xs {
                    self.write_value(e)?;
                }
                Ok(())
            }
            Obj::LinkedList(xs) => {
                self.write_tag(TypeTag::LinkedList)?;
                self.out.write_int(xs.len() as i32)?;
                for e in xs {
                    self.write_value(e)?;
                }
                Ok(())
            }
            Obj::HashMap(map) => {
                self.write_tag(TypeTag::HashMap)?;
                self.out.write_int(map.entries.len() as i32)?;
                self.out.write_float(map.load_factor)?;
                for (k, v) in &map.entries {
                    self.write_value(k)?;
                    self.write_value(v)?;
                }
                Ok(())
            }
            Obj::LinkedHashMap(map) => {
                self.write_tag(TypeTag::LinkedHashMap)?;
                self.out.write_int(map.entries.len() as i32)?;
                self.out.write_float(map.load_factor)?;
                self.out.write_bool(map.access_order)?;
                for (k, v) in &map.entries {
                    self.write_value(k)?;
                    self.write_value(v)?;
                }
                Ok(())
            }
            Obj::HashSet(set) => {
                self.write_tag(TypeTag::HashSet)?;
                self.out.write_int(set.items.len() as i32)?;
                self.out.write_float(set.load_factor)?;
                for e in &set.items {
                    self.write_value(e)?;
                }
                Ok(())
            }
            Obj::LinkedHashSet(set) => {
                self.write_tag(TypeTag::LinkedHashSet)?;
                self.out.write_int(set.items.len() as i32)?;
                self.out.write_float(set.load_factor)?;
                for e in &set.items {
                    self.write_value(e)?;
                }
                Ok(())
            }
            Obj::Properties(props) => {
                self.write_tag(TypeTag::Props)?;
                self.out.write_int(props.entries.len() as i32)?;
                match &props.defaults {
                    Some(d) => self.write_value(d)?,
                    None => self.write_tag(TypeTag::Null)?,
                }
                for (k, v) in &props.entries {
                    self.out.write_string(k)?;
                    self.out.write_string(v)?;
                }
                Ok(())
            }
            Obj::Null | Obj::Enum(_) | Obj::Struct(_) | Obj::Extern(_) | Obj::Aware(_) => {
                Err(MarshalError::Protocol(
                    "class-typed value routed to the builtin path".to_string(),
                ))
            }
        }
    }

    /// Writes a value of a registered class: descriptor resolution,
    /// `writeReplace`, handle registration, tagged payload.
    fn write_classed(&mut self, obj: &ObjRef, key: usize, name: &str) -> Result<()> {
        let mut desc = self.cx.descriptor(name)?;
        if desc.excluded() {
            return self.write_tag(TypeTag::Null);
        }

        let mut target = obj.clone();
        if let Some(replace) = desc.spec().write_replace().cloned() {
            let replaced = replace(&target)?;
            if !Rc::ptr_eq(&replaced, &target) {
                if replaced.borrow().is_null() {
                    return self.write_tag(TypeTag::Null);
                }
                let replaced_key = Rc::as_ptr(&replaced) as usize;
                if let Some(&pos) = self.handles.get(&replaced_key) {
                    self.write_tag(TypeTag::Handle)?;
                    self.out.write_u32(pos)?;
                    self.handles.insert(key, pos);
                    return Ok(());
                }
                let replaced_name = replaced.borrow().class_name().map(str::to_string);
                match replaced_name {
                    Some(rname) => {
                        desc = self.cx.descriptor(&rname)?;
                        if desc.excluded() {
                            return self.write_tag(TypeTag::Null);
                        }
                        target = replaced;
                    }
                    None => {
                        let pos = self.out.position() as u32;
                        self.handles.insert(key, pos);
                        self.handles.insert(replaced_key, pos);
                        return self.write_builtin(&replaced);
                    }
                }
            }
        }

        let pos = self.out.position() as u32;
        self.handles.insert(key, pos);
        self.handles.insert(Rc::as_ptr(&target) as usize, pos);
        let obj_start = pos as usize;

        match desc.tag() {
            TypeTag::Enum => self.write_enum(&target, &desc),
            TypeTag::Externalizable => self.write_externalizable(&target, &desc),
            TypeTag::MarshalAware => self.write_marshal_aware(&target, &desc, obj_start),
            TypeTag::Serializable => self.write_serializable(&target, &desc, obj_start),
            other => Err(MarshalError::Protocol(format!(
                "descriptor of {} has non-writable tag {:?}",
                desc.name(),
                other
            ))),
        }
    }

    fn write_enum(&mut self, target: &ObjRef, desc: &Arc<ClassDescriptor>) -> Result<()> {
        let ordinal = match &*target.borrow() {
            Obj::Enum(e) => e.ordinal,
            _ => {
                return Err(MarshalError::Protocol(format!(
                    "class {} is registered as an enum but the value is not",
                    desc.name()
                )))
            }
        };
        self.write_tag(TypeTag::Enum)?;
        self.write_desc_meta(desc)?;
        self.out.write_int(ordinal)
    }

    fn write_externalizable(&mut self, target: &ObjRef, desc: &Arc<ClassDescriptor>) -> Result<()> {
        self.write_tag(TypeTag::Externalizable)?;
        self.write_desc_meta(desc)?;
        self.out.write_u16(desc.checksum())?;
        let guard = target.borrow();
        let ext = match &*guard {
            Obj::Extern(e) => e,
            _ => {
                return Err(MarshalError::Protocol(format!(
                    "class {} is registered as externalizable but the value is not",
                    desc.name()
                )))
            }
        };
        let mut view = ObjectOutput {
            stream: &mut *self,
            frame: None,
        };
        ext.body.write_external(&mut view)
    }

    fn write_marshal_aware(
        &mut self,
        target: &ObjRef,
        desc: &Arc<ClassDescriptor>,
        obj_start: usize,
    ) -> Result<()> {
        self.write_tag(TypeTag::MarshalAware)?;
        self.write_desc_meta(desc)?;
        self.out.write_u16(desc.checksum())?;

        // Body length word, patched once the footer is in place, keeps
        // nested instances self-delimiting for readers that jump around.
        let len_pos = self.out.position();
        self.out.write_u32(0)?;

        {
            let guard = target.borrow();
            let aware = match &*guard {
                Obj::Aware(a) => a,
                _ => {
                    return Err(MarshalError::Protocol(format!(
                        "class {} is registered as marshal-aware but the value is not",
                        desc.name()
                    )))
                }
            };
            let entries;
            {
                let mut writer = AwareWriter {
                    stream: &mut *self,
                    type_id: desc.type_id(),
                    obj_start,
                    entries: Vec::new(),
                };
                aware.body.write_fields(&mut writer)?;
                entries = writer.entries;
            }
            let footer_start_rel = (self.out.position() - obj_start) as u32;
            for (id, rel) in &entries {
                self.out.write_int(*id)?;
                self.out.write_u32(*rel)?;
            }
            self.out.write_u32(footer_start_rel)?;
        }

        let body_len = (self.out.position() - (len_pos + 4)) as u32;
        self.out.patch_u32(len_pos, body_len);

        if let Some(idx) = self.cx.idx {
            if idx.metadata().get(desc.type_id()).is_none() {
                let guard = target.borrow();
                if let Obj::Aware(aware) = &*guard {
                    let mut collector = MetaCollector::new();
                    aware.body.write_fields(&mut collector)?;
                    idx.metadata().publish(desc.type_id(), collector.into_schema());
                }
            }
        }
        Ok(())
    }

    fn write_serializable(
        &mut self,
        target: &ObjRef,
        desc: &Arc<ClassDescriptor>,
        obj_start: usize,
    ) -> Result<()> {
        if self.cx.require_serializable && !desc.declares_serializable() {
            return Err(MarshalError::NotSerializable(desc.name().to_string()));
        }
        let indexing = match self.cx.idx {
            Some(handler) => handler.enable_for(desc),
            None => false,
        };

        self.write_tag(TypeTag::Serializable)?;
        self.write_desc_meta(desc)?;
        self.out.write_u16(desc.checksum())?;

        let fields = desc.fields().ok_or_else(|| {
            MarshalError::Protocol(format!("{} has no field table", desc.name()))
        })?;

        let mut footer: Vec<(i32, u32)> = Vec::new();
        for (level_idx, level) in fields.levels().iter().enumerate() {
            if let Some(hook) = level.write_hook() {
                let hook = hook.clone();
                let mut view = ObjectOutput {
                    stream: &mut *self,
                    frame: Some(WriteFrame {
                        instance: target.clone(),
                        desc: desc.clone(),
                        level: level_idx,
                    }),
                };
                hook(target, &mut view)?;
            } else {
                self.write_level_default(
                    target,
                    desc,
                    level_idx,
                    indexing,
                    obj_start,
                    if indexing { Some(&mut footer) } else { None },
                )?;
            }
        }

        if indexing {
            let footer_start_rel = (self.out.position() - obj_start) as u32;
            for (id, rel) in &footer {
                self.out.write_int(*id)?;
                self.out.write_u32(*rel)?;
            }
            self.out.write_u32(footer_start_rel)?;
        }
        Ok(())
    }

    /// Writes one level's fields in wire order: primitives raw at their
    /// slots, object fields recursively, phantom override fields as zero.
    fn write_level_default(
        &mut self,
        instance: &ObjRef,
        desc: &Arc<ClassDescriptor>,
        level_idx: usize,
        indexing: bool,
        obj_start: usize,
        mut footer: Option<&mut Vec<(i32, u32)>>,
    ) -> Result<()> {
        let fields = desc.fields().expect("serializable descriptor has fields");
        let level = &fields.levels()[level_idx];
        for info in level.infos() {
            if indexing {
                self.out.write_int(info.id())?;
            }
            if let Some(footer) = footer.as_deref_mut() {
                let rel = (self.out.position() - obj_start) as u32;
                footer.push((info.id(), rel));
            }
            match info.slot() {
                Some(slot_idx) => {
                    let slot = {
                        let guard = instance.borrow();
                        let s = guard.as_struct().ok_or_else(|| {
                            MarshalError::Protocol(format!(
                                "value of class {} is not a struct instance",
                                desc.name()
                            ))
                        })?;
                        s.slot(slot_idx).clone()
                    };
                    match slot {
                        FieldSlot::Byte(v) => self.out.write_byte(v)?,
                        FieldSlot::Short(v) => self.out.write_short(v)?,
                        FieldSlot::Int(v) => self.out.write_int(v)?,
                        FieldSlot::Long(v) => self.out.write_long(v)?,
                        FieldSlot::Float(v) => self.out.write_float(v)?,
                        FieldSlot::Double(v) => self.out.write_double(v)?,
                        FieldSlot::Char(v) => self.out.write_char(v)?,
                        FieldSlot::Bool(v) => self.out.write_bool(v)?,
                        FieldSlot::Other(r) => self.write_value(&r)?,
                    }
                }
                None => match info.kind() {
                    FieldKind::Byte => self.out.write_byte(0)?,
                    FieldKind::Short => self.out.write_short(0)?,
                    FieldKind::Int => self.out.write_int(0)?,
                    FieldKind::Long => self.out.write_long(0)?,
                    FieldKind::Float => self.out.write_float(0.0)?,
                    FieldKind::Double => self.out.write_double(0.0)?,
                    FieldKind::Char => self.out.write_char('\0')?,
                    FieldKind::Bool => self.out.write_bool(false)?,
                    FieldKind::Other => self.write_tag(TypeTag::Null)?,
                },
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
struct WriteFrame {
    instance: ObjRef,
    desc: Arc<ClassDescriptor>,
    level: usize,
}

/// Stream view handed to `write_object`-style hooks and
/// [`Externalizable::write_external`](crate::object::Externalizable).
///
/// Offers the raw primitive writers plus object writes that participate in
/// handle tracking, and `default_write_fields` for the enclosing level.
pub struct ObjectOutput<'s, 'a> {
    stream: &'s mut ObjectOutputStream<'a>,
    frame: Option<WriteFrame>,
}

impl ObjectOutput<'_, '_> {
    /// Writes a value with full handle and descriptor routing.
    pub fn write_value(&mut self, obj: &ObjRef) -> Result<()> {
        self.stream.write_value(obj)
    }

    /// Writes the enclosing level's fields exactly as the default field
    /// walk would. Only valid inside a `write_object` hook.
    pub fn default_write_fields(&mut self) -> Result<()> {
        let frame = self.frame.clone().ok_or_else(|| {
            MarshalError::Protocol("default_write_fields outside a serializable level".to_string())
        })?;
        self.stream
            .write_level_default(&frame.instance, &frame.desc, frame.level, false, 0, None)
    }
}

impl DataOutput for ObjectOutput<'_, '_> {
    fn write_byte(&mut self, v: i8) -> Result<()> {
        self.stream.out.write_byte(v)
    }

    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.stream.out.write_bool(v)
    }

    fn write_short(&mut self, v: i16) -> Result<()> {
        self.stream.out.write_short(v)
    }

    fn write_int(&mut self, v: i32) -> Result<()> {
        self.stream.out.write_int(v)
    }

    fn write_long(&mut self, v: i64) -> Result<()> {
        self.stream.out.write_long(v)
    }

    fn write_float(&mut self, v: f32) -> Result<()> {
        self.stream.out.write_float(v)
    }

    fn write_double(&mut self, v: f64) -> Result<()> {
        self.stream.out.write_double(v)
    }

    fn write_char(&mut self, v: char) -> Result<()> {
        self.stream.out.write_char(v)
    }

    fn write_bytes(&mut self, v: &[u8]) -> Result<()> {
        self.stream.out.write_bytes(v)
    }

    fn write_string(&mut self, v: &str) -> Result<()> {
        self.stream.out.write_string(v)
    }
}

/// Field writer for marshal-aware bodies: prefixes every value with its
/// salted field id and records footer entries as it goes.
struct AwareWriter<'s, 'a> {
    stream: &'s mut ObjectOutputStream<'a>,
    type_id: i32,
    obj_start: usize,
    entries: Vec<(i32, u32)>,
}

impl AwareWriter<'_, '_> {
    fn begin_field(&mut self, name: &str) -> Result<()> {
        let id = field_id(name, self.type_id);
        self.stream.out.write_int(id)?;
        let rel = (self.stream.out.position() - self.obj_start) as u32;
        self.entries.push((id, rel));
        Ok(())
    }
}

impl FieldWriter for AwareWriter<'_, '_> {
    fn write_byte(&mut self, name: &str, v: i8) -> Result<()> {
        self.begin_field(name)?;
        self.stream.out.write_byte(v)
    }

    fn write_short(&mut self, name: &str, v: i16) -> Result<()> {
        self.begin_field(name)?;
        self.stream.out.write_short(v)
    }

    fn write_int(&mut self, name: &str, v: i32) -> Result<()> {
        self.begin_field(name)?;
        self.stream.out.write_int(v)
    }

    fn write_long(&mut self, name: &str, v: i64) -> Result<()> {
        self.begin_field(name)?;
        self.stream.out.write_long(v)
    }

    fn write_float(&mut self, name: &str, v: f32) -> Result<()> {
        self.begin_field(name)?;
        self.stream.out.write_float(v)
    }

    fn write_double(&mut self, name: &str, v: f64) -> Result<()> {
        self.begin_field(name)?;
        self.stream.out.write_double(v)
    }

    fn write_char(&mut self, name: &str, v: char) -> Result<()> {
        self.begin_field(name)?;
        self.stream.out.write_char(v)
    }

    fn write_bool(&mut self, name: &str, v: bool) -> Result<()> {
        self.begin_field(name)?;
        self.stream.out.write_bool(v)
    }

    fn write_obj(&mut self, name: &str, v: &ObjRef) -> Result<()> {
        self.begin_field(name)?;
        self.stream.write_value(v)
    }
}
