//! The dynamic object graph model consumed and produced by the marshaller.
//!
//! Grid values are graphs of [`ObjRef`] nodes. Shared references and cycles
//! are first-class: two edges to the same `ObjRef` marshal as one object and
//! one back-reference, and unmarshal back to a single shared node.

use crate::descriptor::FieldKind;
use crate::error::{MarshalError, Result};
use crate::registry::{ClassRegistry, ClassSpec};
use crate::stream::{ObjectInput, ObjectOutput};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

/// A shared, mutable reference to a graph node.
///
/// Object identity (for handle tracking) is `Rc` pointer identity. Values
/// are single-threaded; each marshal/unmarshal invocation owns its graph.
pub type ObjRef = Rc<RefCell<Obj>>;

/// Default load factor reproduced for hash containers.
pub const DEFAULT_LOAD_FACTOR: f32 = 0.75;

/// A hash-map value with its internal parameters.
#[derive(Debug, PartialEq)]
pub struct MapObj {
    /// Load factor of the backing table.
    pub load_factor: f32,
    /// Entries in insertion order.
    pub entries: Vec<(ObjRef, ObjRef)>,
}

impl Default for MapObj {
    fn default() -> Self {
        Self {
            load_factor: DEFAULT_LOAD_FACTOR,
            entries: Vec::new(),
        }
    }
}

/// A linked hash-map value; additionally carries the access-order flag.
#[derive(Debug, PartialEq)]
pub struct LinkedMapObj {
    /// Load factor of the backing table.
    pub load_factor: f32,
    /// Whether iteration follows access order instead of insertion order.
    pub access_order: bool,
    /// Entries in insertion order.
    pub entries: Vec<(ObjRef, ObjRef)>,
}

impl Default for LinkedMapObj {
    fn default() -> Self {
        Self {
            load_factor: DEFAULT_LOAD_FACTOR,
            access_order: false,
            entries: Vec::new(),
        }
    }
}

/// A hash-set value with its internal parameters.
#[derive(Debug, PartialEq)]
pub struct SetObj {
    /// Load factor of the backing table.
    pub load_factor: f32,
    /// Items in insertion order.
    pub items: Vec<ObjRef>,
}

impl Default for SetObj {
    fn default() -> Self {
        Self {
            load_factor: DEFAULT_LOAD_FACTOR,
            items: Vec::new(),
        }
    }
}

/// A properties table: string entries plus an optional defaults chain.
#[derive(Debug, Default, PartialEq)]
pub struct PropsObj {
    /// Fallback table consulted for missing keys, if any.
    pub defaults: Option<ObjRef>,
    /// Entries in insertion order.
    pub entries: Vec<(String, String)>,
}

/// An enum constant: the declaring class and the constant's ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumObj {
    /// Fully-qualified name of the enum class.
    pub class: String,
    /// Ordinal of the constant within the class's constant table.
    pub ordinal: i32,
}

/// A typed object array: component class name plus elements.
#[derive(Debug, PartialEq)]
pub struct ObjArr {
    /// Fully-qualified name of the component class.
    pub component: String,
    /// Elements in order.
    pub elems: Vec<ObjRef>,
}

/// An externalizable instance: the class controls its own wire form.
pub struct ExternObj {
    /// Fully-qualified class name; must be registered as externalizable.
    pub class: String,
    /// The instance itself.
    pub body: Box<dyn Externalizable>,
}

impl fmt::Debug for ExternObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternObj")
            .field("class", &self.class)
            .field("body", &self.body)
            .finish()
    }
}

/// A marshal-aware instance: writes named fields through a field writer.
pub struct AwareObj {
    /// Fully-qualified class name; must be registered as marshal-aware.
    pub class: String,
    /// The instance itself.
    pub body: Box<dyn MarshalAware>,
}

impl fmt::Debug for AwareObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwareObj")
            .field("class", &self.class)
            .field("body", &self.body)
            .finish()
    }
}

/// A dynamic grid value.
///
/// The built-in variants map one-to-one onto the wire's fast-path tags;
/// `Struct`, `Extern`, and `Aware` instances are typed by a registered
/// class and carry a type-id metadata block on the wire.
#[derive(Debug)]
pub enum Obj {
    /// The null value.
    Null,
    /// Signed 8-bit integer.
    Byte(i8),
    /// Signed 16-bit integer.
    Short(i16),
    /// Signed 32-bit integer.
    Int(i32),
    /// Signed 64-bit integer.
    Long(i64),
    /// 32-bit floating point.
    Float(f32),
    /// 64-bit floating point.
    Double(f64),
    /// Unicode scalar value.
    Char(char),
    /// Boolean value.
    Bool(bool),
    /// UTF-8 string.
    Str(String),
    /// UUID value.
    Uuid(Uuid),
    /// Timestamp in milliseconds since the epoch.
    Date(i64),
    /// A class literal, by fully-qualified name.
    Class(String),
    /// Array of bytes.
    ByteArr(Vec<i8>),
    /// Array of shorts.
    ShortArr(Vec<i16>),
    /// Array of ints.
    IntArr(Vec<i32>),
    /// Array of longs.
    LongArr(Vec<i64>),
    /// Array of floats.
    FloatArr(Vec<f32>),
    /// Array of doubles.
    DoubleArr(Vec<f64>),
    /// Array of chars.
    CharArr(Vec<char>),
    /// Array of booleans.
    BoolArr(Vec<bool>),
    /// An enum constant.
    Enum(EnumObj),
    /// A typed object array.
    ObjArr(ObjArr),
    /// A resizable list.
    ArrayList(Vec<ObjRef>),
    /// A linked list.
    LinkedList(Vec<ObjRef>),
    /// A hash map.
    HashMap(MapObj),
    /// A hash map with predictable iteration order.
    LinkedHashMap(LinkedMapObj),
    /// A hash set.
    HashSet(SetObj),
    /// A hash set with predictable iteration order.
    LinkedHashSet(SetObj),
    /// A properties table.
    Properties(PropsObj),
    /// An instance of a registered serializable class.
    Struct(StructObj),
    /// An instance of a registered externalizable class.
    Extern(ExternObj),
    /// An instance of a registered marshal-aware class.
    Aware(AwareObj),
}

impl Obj {
    /// Wraps this value into a shareable graph node.
    pub fn into_ref(self) -> ObjRef {
        Rc::new(RefCell::new(self))
    }

    /// Returns a fresh null node.
    pub fn null() -> ObjRef {
        Obj::Null.into_ref()
    }

    /// Returns `true` if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Obj::Null)
    }

    /// Returns the registered class name for class-typed values.
    pub fn class_name(&self) -> Option<&str> {
        match self {
            Obj::Struct(s) => Some(s.class()),
            Obj::Extern(e) => Some(&e.class),
            Obj::Aware(a) => Some(&a.class),
            Obj::Enum(e) => Some(&e.class),
            _ => None,
        }
    }

    /// Returns the struct instance, if this is one.
    pub fn as_struct(&self) -> Option<&StructObj> {
        match self {
            Obj::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the struct instance mutably, if this is one.
    pub fn as_struct_mut(&mut self) -> Option<&mut StructObj> {
        match self {
            Obj::Struct(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        // Externalizable and marshal-aware instances have user-defined
        // state; compare them by downcasting the bodies instead.
        match (self, other) {
            (Obj::Null, Obj::Null) => true,
            (Obj::Byte(a), Obj::Byte(b)) => a == b,
            (Obj::Short(a), Obj::Short(b)) => a == b,
            (Obj::Int(a), Obj::Int(b)) => a == b,
            (Obj::Long(a), Obj::Long(b)) => a == b,
            (Obj::Float(a), Obj::Float(b)) => a == b,
            (Obj::Double(a), Obj::Double(b)) => a == b,
            (Obj::Char(a), Obj::Char(b)) => a == b,
            (Obj::Bool(a), Obj::Bool(b)) => a == b,
            (Obj::Str(a), Obj::Str(b)) => a == b,
            (Obj::Uuid(a), Obj::Uuid(b)) => a == b,
            (Obj::Date(a), Obj::Date(b)) => a == b,
            (Obj::Class(a), Obj::Class(b)) => a == b,
            (Obj::ByteArr(a), Obj::ByteArr(b)) => a == b,
            (Obj::ShortArr(a), Obj::ShortArr(b)) => a == b,
            (Obj::IntArr(a), Obj::IntArr(b)) => a == b,
            (Obj::LongArr(a), Obj::LongArr(b)) => a == b,
            (Obj::FloatArr(a), Obj::FloatArr(b)) => a == b,
            (Obj::DoubleArr(a), Obj::DoubleArr(b)) => a == b,
            (Obj::CharArr(a), Obj::CharArr(b)) => a == b,
            (Obj::BoolArr(a), Obj::BoolArr(b)) => a == b,
            (Obj::Enum(a), Obj::Enum(b)) => a == b,
            (Obj::ObjArr(a), Obj::ObjArr(b)) => a == b,
            (Obj::ArrayList(a), Obj::ArrayList(b)) => a == b,
            (Obj::LinkedList(a), Obj::LinkedList(b)) => a == b,
            (Obj::HashMap(a), Obj::HashMap(b)) => a == b,
            (Obj::LinkedHashMap(a), Obj::LinkedHashMap(b)) => a == b,
            (Obj::HashSet(a), Obj::HashSet(b)) => a == b,
            (Obj::LinkedHashSet(a), Obj::LinkedHashSet(b)) => a == b,
            (Obj::Properties(a), Obj::Properties(b)) => a == b,
            (Obj::Struct(a), Obj::Struct(b)) => a == b,
            _ => false,
        }
    }
}

/// A single field slot inside a struct instance.
///
/// Primitive kinds store their value inline so the marshal fast path is a
/// direct load or store with no dispatch; everything else is a graph edge.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSlot {
    /// Inline `i8` value.
    Byte(i8),
    /// Inline `i16` value.
    Short(i16),
    /// Inline `i32` value.
    Int(i32),
    /// Inline `i64` value.
    Long(i64),
    /// Inline `f32` value.
    Float(f32),
    /// Inline `f64` value.
    Double(f64),
    /// Inline `char` value.
    Char(char),
    /// Inline `bool` value.
    Bool(bool),
    /// A reference to another graph node.
    Other(ObjRef),
}

impl FieldSlot {
    /// Returns the zero value for the given field kind.
    pub(crate) fn zero(kind: FieldKind) -> FieldSlot {
        match kind {
            FieldKind::Byte => FieldSlot::Byte(0),
            FieldKind::Short => FieldSlot::Short(0),
            FieldKind::Int => FieldSlot::Int(0),
            FieldKind::Long => FieldSlot::Long(0),
            FieldKind::Float => FieldSlot::Float(0.0),
            FieldKind::Double => FieldSlot::Double(0.0),
            FieldKind::Char => FieldSlot::Char('\0'),
            FieldKind::Bool => FieldSlot::Bool(false),
            FieldKind::Other => FieldSlot::Other(Obj::null()),
        }
    }

    /// Returns the kind of value held in this slot.
    pub(crate) fn kind(&self) -> FieldKind {
        match self {
            FieldSlot::Byte(_) => FieldKind::Byte,
            FieldSlot::Short(_) => FieldKind::Short,
            FieldSlot::Int(_) => FieldKind::Int,
            FieldSlot::Long(_) => FieldKind::Long,
            FieldSlot::Float(_) => FieldKind::Float,
            FieldSlot::Double(_) => FieldKind::Double,
            FieldSlot::Char(_) => FieldKind::Char,
            FieldSlot::Bool(_) => FieldKind::Bool,
            FieldSlot::Other(_) => FieldKind::Other,
        }
    }
}

/// A field value crossing the public get/set boundary of a struct instance.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// `i8` value.
    Byte(i8),
    /// `i16` value.
    Short(i16),
    /// `i32` value.
    Int(i32),
    /// `i64` value.
    Long(i64),
    /// `f32` value.
    Float(f32),
    /// `f64` value.
    Double(f64),
    /// `char` value.
    Char(char),
    /// `bool` value.
    Bool(bool),
    /// Any other value, as a graph node.
    Obj(ObjRef),
}

impl FieldValue {
    fn into_slot(self) -> FieldSlot {
        match self {
            FieldValue::Byte(v) => FieldSlot::Byte(v),
            FieldValue::Short(v) => FieldSlot::Short(v),
            FieldValue::Int(v) => FieldSlot::Int(v),
            FieldValue::Long(v) => FieldSlot::Long(v),
            FieldValue::Float(v) => FieldSlot::Float(v),
            FieldValue::Double(v) => FieldSlot::Double(v),
            FieldValue::Char(v) => FieldSlot::Char(v),
            FieldValue::Bool(v) => FieldSlot::Bool(v),
            FieldValue::Obj(v) => FieldSlot::Other(v),
        }
    }

    fn from_slot(slot: &FieldSlot) -> FieldValue {
        match slot {
            FieldSlot::Byte(v) => FieldValue::Byte(*v),
            FieldSlot::Short(v) => FieldValue::Short(*v),
            FieldSlot::Int(v) => FieldValue::Int(*v),
            FieldSlot::Long(v) => FieldValue::Long(*v),
            FieldSlot::Float(v) => FieldValue::Float(*v),
            FieldSlot::Double(v) => FieldValue::Double(*v),
            FieldSlot::Char(v) => FieldValue::Char(*v),
            FieldSlot::Bool(v) => FieldValue::Bool(*v),
            FieldSlot::Other(v) => FieldValue::Obj(v.clone()),
        }
    }

    /// Returns the `ObjRef` payload, if this is an object value.
    pub fn as_obj(&self) -> Option<&ObjRef> {
        match self {
            FieldValue::Obj(r) => Some(r),
            _ => None,
        }
    }
}

impl From<i8> for FieldValue {
    fn from(v: i8) -> Self {
        FieldValue::Byte(v)
    }
}

impl From<i16> for FieldValue {
    fn from(v: i16) -> Self {
        FieldValue::Short(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Long(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::Float(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

impl From<char> for FieldValue {
    fn from(v: char) -> Self {
        FieldValue::Char(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Obj(Obj::Str(v.to_string()).into_ref())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Obj(Obj::Str(v).into_ref())
    }
}

impl From<ObjRef> for FieldValue {
    fn from(v: ObjRef) -> Self {
        FieldValue::Obj(v)
    }
}

/// An instance of a registered serializable class.
///
/// Field storage is a flat slot table laid out at registration time:
/// hierarchy levels base-class first, declared order within a level. The
/// descriptor records each wire field's slot, so population on read is a
/// direct store at the recorded slot.
#[derive(Debug)]
pub struct StructObj {
    spec: Arc<ClassSpec>,
    slots: Vec<FieldSlot>,
}

impl StructObj {
    /// Allocates a zero-initialized instance without running any
    /// constructor: every slot starts at its kind's zero value.
    pub fn zeroed(spec: Arc<ClassSpec>) -> Result<StructObj> {
        let layout = spec.layout().ok_or_else(|| {
            MarshalError::Configuration(format!(
                "class is not serializable-kind: {}",
                spec.name()
            ))
        })?;
        let slots = layout
            .slots()
            .iter()
            .map(|s| FieldSlot::zero(s.kind))
            .collect();
        Ok(StructObj { spec, slots })
    }

    /// Returns the instance's class name.
    pub fn class(&self) -> &str {
        self.spec.name()
    }

    /// Returns the class spec this instance was created from.
    pub fn spec(&self) -> &Arc<ClassSpec> {
        &self.spec
    }

    /// Reads a field by name. Duplicate names across hierarchy levels
    /// resolve to the leaf-most declaration.
    pub fn get(&self, name: &str) -> Result<FieldValue> {
        let layout = self.spec.layout().expect("serializable spec has layout");
        let idx = layout
            .slot_of(name)
            .ok_or_else(|| MarshalError::FieldNotFound(name.to_string()))?;
        Ok(FieldValue::from_slot(&self.slots[idx]))
    }

    /// Writes a field by name, checking the value against the declared kind.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<()> {
        let layout = self.spec.layout().expect("serializable spec has layout");
        let idx = layout
            .slot_of(name)
            .ok_or_else(|| MarshalError::FieldNotFound(name.to_string()))?;
        let slot = value.into().into_slot();
        let declared = layout.slots()[idx].kind;
        if slot.kind() != declared {
            return Err(MarshalError::Configuration(format!(
                "field '{}' of {} expects {:?}, got {:?}",
                name,
                self.spec.name(),
                declared,
                slot.kind()
            )));
        }
        self.slots[idx] = slot;
        Ok(())
    }

    pub(crate) fn slot(&self, idx: usize) -> &FieldSlot {
        &self.slots[idx]
    }

    pub(crate) fn set_slot(&mut self, idx: usize, slot: FieldSlot) {
        self.slots[idx] = slot;
    }
}

impl PartialEq for StructObj {
    fn eq(&self, other: &Self) -> bool {
        self.spec.name() == other.spec.name() && self.slots == other.slots
    }
}

/// Builder for struct instances of a registered class.
#[derive(Debug)]
pub struct StructBuilder {
    inner: StructObj,
}

impl StructBuilder {
    /// Starts building an instance of `class` looked up in `registry`.
    pub fn new(registry: &ClassRegistry, class: &str) -> Result<StructBuilder> {
        let spec = registry.lookup(class).ok_or_else(|| {
            MarshalError::ClassNotFound(class.to_string())
        })?;
        Ok(StructBuilder {
            inner: StructObj::zeroed(spec)?,
        })
    }

    /// Sets a field by name.
    pub fn set(mut self, name: &str, value: impl Into<FieldValue>) -> Result<StructBuilder> {
        self.inner.set(name, value)?;
        Ok(self)
    }

    /// Finishes the instance as a graph node.
    pub fn build(self) -> ObjRef {
        Obj::Struct(self.inner).into_ref()
    }
}

/// A type that controls its own wire form through raw stream access.
///
/// Registered with a no-arg constructor which the read path invokes (the
/// one place where reconstruction runs user code before field population).
pub trait Externalizable: fmt::Debug {
    /// Writes this instance's state to the stream view.
    fn write_external(&self, out: &mut ObjectOutput<'_, '_>) -> Result<()>;

    /// Restores this instance's state from the stream view.
    fn read_external(&mut self, input: &mut ObjectInput<'_, '_>) -> Result<()>;

    /// Upcast for downcasting in embedding code.
    fn as_any(&self) -> &dyn Any;
}

/// A type that writes named, individually addressable fields.
///
/// The field payload carries per-field identifiers and a footer, so
/// `read_field` works on these instances, and reads may come back in any
/// order.
pub trait MarshalAware: fmt::Debug {
    /// Writes this instance's fields through the field writer.
    fn write_fields(&self, writer: &mut dyn FieldWriter) -> Result<()>;

    /// Restores this instance's fields through the field reader.
    fn read_fields(&mut self, reader: &mut dyn FieldReader) -> Result<()>;

    /// Upcast for downcasting in embedding code.
    fn as_any(&self) -> &dyn Any;
}

/// Writer of named fields for marshal-aware types.
pub trait FieldWriter {
    /// Writes a byte field.
    fn write_byte(&mut self, name: &str, v: i8) -> Result<()>;

    /// Writes a short field.
    fn write_short(&mut self, name: &str, v: i16) -> Result<()>;

    /// Writes an int field.
    fn write_int(&mut self, name: &str, v: i32) -> Result<()>;

    /// Writes a long field.
    fn write_long(&mut self, name: &str, v: i64) -> Result<()>;

    /// Writes a float field.
    fn write_float(&mut self, name: &str, v: f32) -> Result<()>;

    /// Writes a double field.
    fn write_double(&mut self, name: &str, v: f64) -> Result<()>;

    /// Writes a char field.
    fn write_char(&mut self, name: &str, v: char) -> Result<()>;

    /// Writes a bool field.
    fn write_bool(&mut self, name: &str, v: bool) -> Result<()>;

    /// Writes an object field.
    fn write_obj(&mut self, name: &str, v: &ObjRef) -> Result<()>;
}

/// Reader of named fields for marshal-aware types.
pub trait FieldReader {
    /// Reads a byte field.
    fn read_byte(&mut self, name: &str) -> Result<i8>;

    /// Reads a short field.
    fn read_short(&mut self, name: &str) -> Result<i16>;

    /// Reads an int field.
    fn read_int(&mut self, name: &str) -> Result<i32>;

    /// Reads a long field.
    fn read_long(&mut self, name: &str) -> Result<i64>;

    /// Reads a float field.
    fn read_float(&mut self, name: &str) -> Result<f32>;

    /// Reads a double field.
    fn read_double(&mut self, name: &str) -> Result<f64>;

    /// Reads a char field.
    fn read_char(&mut self, name: &str) -> Result<char>;

    /// Reads a bool field.
    fn read_bool(&mut self, name: &str) -> Result<bool>;

    /// Reads an object field.
    fn read_obj(&mut self, name: &str) -> Result<ObjRef>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FieldKind;
    use crate::registry::{ClassRegistry, ClassSpec, LevelSpec};

    fn person_registry() -> ClassRegistry {
        let registry = ClassRegistry::new();
        registry.register(
            ClassSpec::serializable("com.acme.Person")
                .level(
                    LevelSpec::new("com.acme.Person")
                        .field("age", FieldKind::Int)
                        .field("name", FieldKind::Other),
                )
                .build(),
        );
        registry
    }

    #[test]
    fn test_zeroed_instance_has_zero_slots() {
        let registry = person_registry();
        let obj = registry.new_instance("com.acme.Person").unwrap();
        let guard = obj.borrow();
        let s = guard.as_struct().unwrap();
        assert_eq!(s.get("age").unwrap(), FieldValue::Int(0));
        match s.get("name").unwrap() {
            FieldValue::Obj(r) => assert!(r.borrow().is_null()),
            other => panic!("expected object slot, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_sets_fields() {
        let registry = person_registry();
        let obj = StructBuilder::new(&registry, "com.acme.Person")
            .unwrap()
            .set("age", 41)
            .unwrap()
            .set("name", "Ada")
            .unwrap()
            .build();
        let guard = obj.borrow();
        let s = guard.as_struct().unwrap();
        assert_eq!(s.get("age").unwrap(), FieldValue::Int(41));
    }

    #[test]
    fn test_set_kind_mismatch_rejected() {
        let registry = person_registry();
        let obj = registry.new_instance("com.acme.Person").unwrap();
        let mut guard = obj.borrow_mut();
        let s = guard.as_struct_mut().unwrap();
        let err = s.set("age", 1i64).unwrap_err();
        assert!(matches!(err, MarshalError::Configuration(_)));
    }

    #[test]
    fn test_set_unknown_field_rejected() {
        let registry = person_registry();
        let obj = registry.new_instance("com.acme.Person").unwrap();
        let mut guard = obj.borrow_mut();
        let s = guard.as_struct_mut().unwrap();
        let err = s.set("missing", 1).unwrap_err();
        assert!(matches!(err, MarshalError::FieldNotFound(_)));
    }

    #[test]
    fn test_obj_equality_structural() {
        assert_eq!(Obj::Int(5), Obj::Int(5));
        assert_ne!(Obj::Int(5), Obj::Long(5));
        assert_eq!(
            Obj::Str("abc".to_string()),
            Obj::Str("abc".to_string())
        );
        assert_ne!(Obj::Null, Obj::Int(0));
    }

    #[test]
    fn test_container_equality_includes_parameters() {
        let a = Obj::HashMap(MapObj::default());
        let b = Obj::HashMap(MapObj {
            load_factor: 0.5,
            entries: Vec::new(),
        });
        assert_ne!(a, b);
    }

    #[test]
    fn test_field_value_conversions() {
        assert_eq!(FieldValue::from(7i32), FieldValue::Int(7));
        assert_eq!(FieldValue::from(true), FieldValue::Bool(true));
        match FieldValue::from("s") {
            FieldValue::Obj(r) => assert_eq!(*r.borrow(), Obj::Str("s".to_string())),
            other => panic!("unexpected {:?}", other),
        }
    }
}
