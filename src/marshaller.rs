//! The marshaller: configuration and the public marshal/unmarshal/field
//! access surface.

use crate::context::{IdMapper, LocalMarshallerContext, MarshallerContext};
use crate::descriptor::DescriptorCache;
use crate::error::{MarshalError, Result};
use crate::index::{self, CacheObjectContext, FieldResult, IndexingHandler};
use crate::object::ObjRef;
use crate::registry::{ClassRegistry, ClassResolver, LoaderId};
use crate::stream::{ObjectInputStream, ObjectOutputStream, StreamContext, StreamRegistry};
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Wire protocol version. Only `V1` is defined; later versions must add a
/// stream preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// The initial wire layout.
    #[default]
    V1,
}

/// Optimized binary object marshaller.
///
/// Serializes dynamic object graphs to a compact tagged wire form and
/// reconstructs them, preserving shared references and cycles. One
/// instance is shared freely across threads; each call owns a pooled or
/// thread-cached stream handle for its duration.
pub struct Marshaller {
    registry: Arc<ClassRegistry>,
    cache: DescriptorCache,
    ctx: Arc<dyn MarshallerContext>,
    mapper: Option<Arc<dyn IdMapper>>,
    require_serializable: bool,
    protocol_version: ProtocolVersion,
    exclusions: HashSet<String>,
    idx: Option<Arc<IndexingHandler>>,
    streams: StreamRegistry,
}

impl fmt::Debug for Marshaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Marshaller")
            .field("registry", &self.registry)
            .field("require_serializable", &self.require_serializable)
            .field("protocol_version", &self.protocol_version)
            .field("indexing", &self.idx.is_some())
            .finish()
    }
}

impl Marshaller {
    /// Creates a marshaller over the given class registry with defaults:
    /// `require_serializable` on, thread-local stream handles, an
    /// in-process context, no id mapper, no indexing handler.
    pub fn new(registry: Arc<ClassRegistry>) -> Result<Marshaller> {
        if !Self::available() {
            return Err(MarshalError::UnsupportedPlatform(
                "pointer width below 32 bits cannot address wire positions".to_string(),
            ));
        }
        Ok(Marshaller {
            registry,
            cache: DescriptorCache::new(),
            ctx: Arc::new(LocalMarshallerContext::new()),
            mapper: None,
            require_serializable: true,
            protocol_version: ProtocolVersion::V1,
            exclusions: HashSet::new(),
            idx: None,
            streams: StreamRegistry::new(0),
        })
    }

    /// Whether the marshaller can work on this platform. Checked in the
    /// constructor; wire positions are 32-bit.
    pub fn available() -> bool {
        std::mem::size_of::<usize>() >= 4
    }

    /// Sets whether written classes must formally declare the serializable
    /// capability.
    pub fn with_require_serializable(mut self, require: bool) -> Marshaller {
        self.require_serializable = require;
        self
    }

    /// Installs a custom name→id mapper.
    pub fn with_id_mapper(mut self, mapper: Arc<dyn IdMapper>) -> Marshaller {
        self.mapper = Some(mapper);
        self
    }

    /// Installs the cluster-wide marshaller context.
    pub fn with_context(mut self, ctx: Arc<dyn MarshallerContext>) -> Marshaller {
        self.ctx = ctx;
        self
    }

    /// Selects the wire protocol version.
    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Marshaller {
        self.protocol_version = version;
        self
    }

    /// Sizes the shared stream pool. `0` (the default) keeps one cached
    /// handle per thread instead; a positive size bounds concurrency and
    /// memory, with blocking acquire.
    pub fn with_pool_size(mut self, pool_size: u32) -> Marshaller {
        self.streams = StreamRegistry::new(pool_size);
        self
    }

    /// Installs the field-indexing handler, enabling `has_field` and
    /// `read_field` over marshalled bytes.
    pub fn with_indexing_handler(mut self, handler: Arc<IndexingHandler>) -> Marshaller {
        self.idx = Some(handler);
        self
    }

    /// Adds a class name to the exclusion list. Excluded instances write
    /// as null.
    pub fn exclude(mut self, class_name: impl Into<String>) -> Marshaller {
        self.exclusions.insert(class_name.into());
        self
    }

    /// Returns the class registry this marshaller writes with.
    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    /// Returns the configured protocol version.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    /// Returns the indexing handler, if configured.
    pub fn indexing_handler(&self) -> Option<&Arc<IndexingHandler>> {
        self.idx.as_ref()
    }

    fn context<'a>(&'a self, resolver: &'a dyn ClassResolver) -> StreamContext<'a> {
        StreamContext {
            cache: &self.cache,
            ctx: self.ctx.as_ref(),
            mapper: self.mapper.as_deref(),
            exclusions: &self.exclusions,
            resolver,
            require_serializable: self.require_serializable,
            idx: self.idx.as_deref(),
        }
    }

    /// Marshals one object graph to bytes.
    pub fn marshal(&self, obj: &ObjRef) -> Result<Vec<u8>> {
        let mut guard = self.streams.acquire_out();
        let handle = guard.handle_mut();
        let cx = self.context(self.registry.as_ref());
        let mut stream = ObjectOutputStream::new(&mut handle.buf, &mut handle.handles, cx);
        stream.write_object(obj)?;
        Ok(handle.buf.as_bytes().to_vec())
    }

    /// Marshals one object graph into an output sink.
    pub fn marshal_to(&self, obj: &ObjRef, sink: &mut dyn io::Write) -> Result<()> {
        let mut guard = self.streams.acquire_out();
        let handle = guard.handle_mut();
        let cx = self.context(self.registry.as_ref());
        let mut stream = ObjectOutputStream::new(&mut handle.buf, &mut handle.handles, cx);
        stream.write_object(obj)?;
        sink.write_all(handle.buf.as_bytes())?;
        Ok(())
    }

    /// Unmarshals one object graph, resolving classes through `resolver`.
    pub fn unmarshal(&self, bytes: &[u8], resolver: &dyn ClassResolver) -> Result<ObjRef> {
        self.unmarshal_slice(bytes, 0, bytes.len(), resolver)
    }

    /// Unmarshals one object graph from a sub-range of `bytes`.
    pub fn unmarshal_slice(
        &self,
        bytes: &[u8],
        off: usize,
        len: usize,
        resolver: &dyn ClassResolver,
    ) -> Result<ObjRef> {
        let data = Self::slice(bytes, off, len)?;
        let _guard = self.streams.acquire_in();
        let cx = self.context(resolver);
        let mut stream = ObjectInputStream::new(data, cx);
        stream.read_object()
    }

    /// Whether the object serialized in `bytes[off..off+len]` has a field
    /// named `name`, answered from the footer without deserializing.
    pub fn has_field(&self, name: &str, bytes: &[u8], off: usize, len: usize) -> Result<bool> {
        let _guard = self.streams.acquire_in();
        let cx = self.context(self.registry.as_ref());
        index::has_field(name, bytes, off, len, &cx)
    }

    /// Extracts one field from the object serialized in
    /// `bytes[off..off+len]`. With a [`CacheObjectContext`] that keeps
    /// binary, an indexable field value comes back undecoded.
    pub fn read_field(
        &self,
        name: &str,
        bytes: &[u8],
        off: usize,
        len: usize,
        resolver: &dyn ClassResolver,
        ctx: Option<&CacheObjectContext>,
    ) -> Result<FieldResult> {
        let _guard = self.streams.acquire_in();
        let cx = self.context(resolver);
        let keep_binary = ctx.map(|c| c.keep_binary()).unwrap_or(false);
        index::read_field(name, bytes, off, len, &cx, keep_binary)
    }

    /// Decodes one value at `pos` inside `data`; used by lazy cache
    /// objects.
    pub(crate) fn read_value_in(
        &self,
        data: &[u8],
        pos: usize,
        resolver: &dyn ClassResolver,
    ) -> Result<ObjRef> {
        let _guard = self.streams.acquire_in();
        let cx = self.context(resolver);
        index::read_value_at(data, pos, &cx)
    }

    /// Undeploy callback: drops every cached descriptor whose class came
    /// from `loader`, along with its published field metadata. In-flight
    /// calls holding a removed descriptor complete normally.
    pub fn on_undeploy(&self, loader: LoaderId) {
        let removed = self.cache.remove_loader(loader);
        if let Some(idx) = &self.idx {
            for type_id in &removed {
                idx.metadata().remove(*type_id);
            }
        }
        tracing::info!(?loader, descriptors = removed.len(), "undeployed class loader");
    }

    fn slice(bytes: &[u8], off: usize, len: usize) -> Result<&[u8]> {
        if off.checked_add(len).map_or(true, |end| end > bytes.len()) {
            return Err(MarshalError::Protocol(format!(
                "blob range [{}, {}+{}) out of bounds (input is {} bytes)",
                off,
                off,
                len,
                bytes.len()
            )));
        }
        Ok(&bytes[off..off + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FieldKind;
    use crate::object::{
        Externalizable, FieldReader, FieldValue, FieldWriter, MapObj, MarshalAware, Obj, ObjArr,
        PropsObj, SetObj, StructBuilder,
    };
    use crate::registry::{ClassSpec, LevelSpec, ReadObjectFn, WriteObjectFn};
    use crate::stream::{DataInput, DataOutput};
    use std::any::Any;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn empty_grid() -> (Arc<ClassRegistry>, Marshaller) {
        let registry = Arc::new(ClassRegistry::new());
        let marshaller = Marshaller::new(registry.clone()).unwrap();
        (registry, marshaller)
    }

    fn person_spec() -> ClassSpec {
        ClassSpec::serializable("t.Person")
            .level(
                LevelSpec::new("t.Person")
                    .field("age", FieldKind::Int)
                    .field("name", FieldKind::Other),
            )
            .build()
    }

    fn round_trip(marshaller: &Marshaller, registry: &ClassRegistry, obj: &ObjRef) -> ObjRef {
        let bytes = marshaller.marshal(obj).unwrap();
        marshaller.unmarshal(&bytes, registry).unwrap()
    }

    #[test]
    fn test_marshal_null_exact_bytes() {
        let (registry, m) = empty_grid();
        let bytes = m.marshal(&Obj::null()).unwrap();
        assert_eq!(bytes, vec![0]);
        let back = m.unmarshal(&bytes, registry.as_ref()).unwrap();
        assert!(back.borrow().is_null());
    }

    #[test]
    fn test_marshal_int_exact_bytes() {
        let (_registry, m) = empty_grid();
        let bytes = m.marshal(&Obj::Int(42).into_ref()).unwrap();
        assert_eq!(bytes, vec![4, 0x2A, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_marshal_string_exact_bytes() {
        let (_registry, m) = empty_grid();
        let bytes = m.marshal(&Obj::Str("abc".to_string()).into_ref()).unwrap();
        assert_eq!(bytes, vec![18, 0x03, 0x00, 0x00, 0x00, b'a', b'b', b'c']);
    }

    #[test]
    fn test_primitive_round_trips() {
        let (registry, m) = empty_grid();
        let values = vec![
            Obj::Byte(-7),
            Obj::Short(-12345),
            Obj::Int(i32::MIN),
            Obj::Long(i64::MAX),
            Obj::Float(3.5),
            Obj::Double(std::f64::consts::PI),
            Obj::Char('\u{1F680}'),
            Obj::Bool(true),
            Obj::Str("hello ä¸–ç•Œ".to_string()),
            Obj::Uuid(Uuid::from_u64_pair(0xDEAD_BEEF, 0xCAFE_F00D)),
            Obj::Date(1_700_000_000_000),
            Obj::ByteArr(vec![1, -2, 3]),
            Obj::ShortArr(vec![-1, 0, 1]),
            Obj::IntArr(vec![i32::MIN, 0, i32::MAX]),
            Obj::LongArr(vec![42]),
            Obj::FloatArr(vec![0.5, -0.5]),
            Obj::DoubleArr(vec![1.25]),
            Obj::CharArr(vec!['a', 'ß', '\u{1F980}']),
            Obj::BoolArr(vec![true, false, true]),
        ];
        for v in values {
            let original = v.into_ref();
            let back = round_trip(&m, &registry, &original);
            assert_eq!(*back.borrow(), *original.borrow());
        }
    }

    #[test]
    fn test_container_round_trips() {
        let (registry, m) = empty_grid();
        let list = Obj::ArrayList(vec![
            Obj::Int(1).into_ref(),
            Obj::Str("two".to_string()).into_ref(),
            Obj::null(),
        ])
        .into_ref();
        let back = round_trip(&m, &registry, &list);
        assert_eq!(*back.borrow(), *list.borrow());

        let map = Obj::HashMap(MapObj {
            load_factor: 0.75,
            entries: vec![(
                Obj::Str("k".to_string()).into_ref(),
                Obj::Long(9).into_ref(),
            )],
        })
        .into_ref();
        let back = round_trip(&m, &registry, &map);
        assert_eq!(*back.borrow(), *map.borrow());

        let set = Obj::LinkedHashSet(SetObj {
            load_factor: 0.5,
            items: vec![Obj::Int(3).into_ref(), Obj::Int(1).into_ref()],
        })
        .into_ref();
        let back = round_trip(&m, &registry, &set);
        assert_eq!(*back.borrow(), *set.borrow());
    }

    #[test]
    fn test_properties_round_trip_with_defaults_chain() {
        let (registry, m) = empty_grid();
        let base = Obj::Properties(PropsObj {
            defaults: None,
            entries: vec![("a".to_string(), "1".to_string())],
        })
        .into_ref();
        let props = Obj::Properties(PropsObj {
            defaults: Some(base),
            entries: vec![("b".to_string(), "2".to_string())],
        })
        .into_ref();
        let back = round_trip(&m, &registry, &props);
        assert_eq!(*back.borrow(), *props.borrow());
    }

    #[test]
    fn test_class_literal_and_object_array() {
        let (registry, m) = empty_grid();
        registry.register(person_spec());
        let arr = Obj::ObjArr(ObjArr {
            component: "t.Person".to_string(),
            elems: vec![Obj::null(), Obj::Int(1).into_ref()],
        })
        .into_ref();
        let back = round_trip(&m, &registry, &arr);
        assert_eq!(*back.borrow(), *arr.borrow());

        let class_literal = Obj::Class("t.Person".to_string()).into_ref();
        let back = round_trip(&m, &registry, &class_literal);
        assert_eq!(*back.borrow(), *class_literal.borrow());
    }

    #[test]
    fn test_struct_round_trip() {
        let (registry, m) = empty_grid();
        registry.register(person_spec());
        let person = StructBuilder::new(&registry, "t.Person")
            .unwrap()
            .set("age", 41)
            .unwrap()
            .set("name", "Ada")
            .unwrap()
            .build();
        let back = round_trip(&m, &registry, &person);
        assert_eq!(*back.borrow(), *person.borrow());
    }

    #[test]
    fn test_identity_preserved_for_shared_children() {
        let (registry, m) = empty_grid();
        let shared = Obj::Str("shared".to_string()).into_ref();
        let list = Obj::ArrayList(vec![shared.clone(), shared]).into_ref();
        let back = round_trip(&m, &registry, &list);
        let guard = back.borrow();
        match &*guard {
            Obj::ArrayList(xs) => {
                assert_eq!(xs.len(), 2);
                assert!(Rc::ptr_eq(&xs[0], &xs[1]));
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_self_cycle_round_trips_with_identity() {
        let (registry, m) = empty_grid();
        registry.register(
            ClassSpec::serializable("t.Node")
                .level(LevelSpec::new("t.Node").field("next", FieldKind::Other))
                .build(),
        );
        let node = registry.new_instance("t.Node").unwrap();
        node.borrow_mut()
            .as_struct_mut()
            .unwrap()
            .set("next", node.clone())
            .unwrap();

        let back = round_trip(&m, &registry, &node);
        let next = match back.borrow().as_struct().unwrap().get("next").unwrap() {
            FieldValue::Obj(r) => r,
            other => panic!("expected object field, got {:?}", other),
        };
        assert!(Rc::ptr_eq(&back, &next));
    }

    #[test]
    fn test_marshal_is_deterministic() {
        let (registry, m) = empty_grid();
        registry.register(person_spec());
        let make = || {
            StructBuilder::new(&registry, "t.Person")
                .unwrap()
                .set("age", 7)
                .unwrap()
                .set("name", "Grace")
                .unwrap()
                .build()
        };
        let a = m.marshal(&make()).unwrap();
        let b = m.marshal(&make()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_transient_field_does_not_change_bytes() {
        let registry_plain = Arc::new(ClassRegistry::new());
        registry_plain.register(
            ClassSpec::serializable("t.P")
                .level(LevelSpec::new("t.P").field("x", FieldKind::Int))
                .build(),
        );
        let registry_transient = Arc::new(ClassRegistry::new());
        registry_transient.register(
            ClassSpec::serializable("t.P")
                .level(
                    LevelSpec::new("t.P")
                        .field("x", FieldKind::Int)
                        .transient_field("scratch", FieldKind::Long),
                )
                .build(),
        );

        let m_plain = Marshaller::new(registry_plain.clone()).unwrap();
        let m_transient = Marshaller::new(registry_transient.clone()).unwrap();

        let a = StructBuilder::new(&registry_plain, "t.P")
            .unwrap()
            .set("x", 13)
            .unwrap()
            .build();
        let b = StructBuilder::new(&registry_transient, "t.P")
            .unwrap()
            .set("x", 13)
            .unwrap()
            .build();
        b.borrow_mut()
            .as_struct_mut()
            .unwrap()
            .set("scratch", 999i64)
            .unwrap();

        assert_eq!(m_plain.marshal(&a).unwrap(), m_transient.marshal(&b).unwrap());
    }

    #[test]
    fn test_checksum_rejection_on_schema_drift() {
        let writer_registry = Arc::new(ClassRegistry::new());
        writer_registry.register(
            ClassSpec::serializable("t.V")
                .level(LevelSpec::new("t.V").field("x", FieldKind::Int))
                .build(),
        );
        let m = Marshaller::new(writer_registry.clone()).unwrap();
        let obj = StructBuilder::new(&writer_registry, "t.V")
            .unwrap()
            .set("x", 5)
            .unwrap()
            .build();
        let bytes = m.marshal(&obj).unwrap();

        let reader_registry = ClassRegistry::new();
        reader_registry.register(
            ClassSpec::serializable("t.V")
                .level(LevelSpec::new("t.V").field("x", FieldKind::Long))
                .build(),
        );
        let err = m.unmarshal(&bytes, &reader_registry).unwrap_err();
        assert!(matches!(err, MarshalError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_class_not_found_on_unregistered_reader() {
        let (registry, m) = empty_grid();
        registry.register(person_spec());
        let obj = StructBuilder::new(&registry, "t.Person").unwrap().build();
        let bytes = m.marshal(&obj).unwrap();

        let empty = ClassRegistry::new();
        let err = m.unmarshal(&bytes, &empty).unwrap_err();
        assert!(matches!(err, MarshalError::ClassNotFound(_)));
    }

    #[test]
    fn test_require_serializable_enforced() {
        let (registry, m) = empty_grid();
        registry.register(
            ClassSpec::serializable("t.Opaque")
                .declares_serializable(false)
                .level(LevelSpec::new("t.Opaque").field("x", FieldKind::Int))
                .build(),
        );
        let obj = StructBuilder::new(&registry, "t.Opaque").unwrap().build();
        let err = m.marshal(&obj).unwrap_err();
        assert!(matches!(err, MarshalError::NotSerializable(_)));

        let lenient = Marshaller::new(registry.clone())
            .unwrap()
            .with_require_serializable(false);
        let bytes = lenient.marshal(&obj).unwrap();
        let back = lenient.unmarshal(&bytes, registry.as_ref()).unwrap();
        assert_eq!(*back.borrow(), *obj.borrow());
    }

    #[test]
    fn test_excluded_class_marshals_as_null() {
        let registry = Arc::new(ClassRegistry::new());
        registry.register(person_spec());
        let m = Marshaller::new(registry.clone())
            .unwrap()
            .exclude("t.Person");
        let obj = StructBuilder::new(&registry, "t.Person").unwrap().build();
        let bytes = m.marshal(&obj).unwrap();
        assert_eq!(bytes, vec![0]);
        assert!(m
            .unmarshal(&bytes, registry.as_ref())
            .unwrap()
            .borrow()
            .is_null());
    }

    #[test]
    fn test_enum_round_trip_and_ordinal_validation() {
        let (registry, m) = empty_grid();
        registry.register(ClassSpec::enumeration("t.Color", ["RED", "GREEN", "BLUE"]));
        let color = Obj::Enum(crate::object::EnumObj {
            class: "t.Color".to_string(),
            ordinal: 2,
        })
        .into_ref();
        let back = round_trip(&m, &registry, &color);
        assert_eq!(*back.borrow(), *color.borrow());

        let bad = Obj::Enum(crate::object::EnumObj {
            class: "t.Color".to_string(),
            ordinal: 9,
        })
        .into_ref();
        let bytes = m.marshal(&bad).unwrap();
        let err = m.unmarshal(&bytes, registry.as_ref()).unwrap_err();
        assert!(matches!(err, MarshalError::Protocol(_)));
    }

    #[derive(Debug)]
    struct Point {
        x: i32,
    }

    impl Externalizable for Point {
        fn write_external(&self, out: &mut crate::stream::ObjectOutput<'_, '_>) -> Result<()> {
            out.write_int(self.x)
        }

        fn read_external(&mut self, input: &mut crate::stream::ObjectInput<'_, '_>) -> Result<()> {
            self.x = input.read_int()?;
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_externalizable_round_trip_ctor_runs_once() {
        let (registry, m) = empty_grid();
        let ctor_calls = Arc::new(AtomicUsize::new(0));
        let counter = ctor_calls.clone();
        registry.register(ClassSpec::externalizable(
            "t.Point",
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::new(Point { x: 0 })
            }),
        ));

        let point = Obj::Extern(crate::object::ExternObj {
            class: "t.Point".to_string(),
            body: Box::new(Point { x: 7 }),
        })
        .into_ref();

        let bytes = m.marshal(&point).unwrap();
        assert_eq!(ctor_calls.load(Ordering::SeqCst), 0);
        let back = m.unmarshal(&bytes, registry.as_ref()).unwrap();
        assert_eq!(ctor_calls.load(Ordering::SeqCst), 1);

        let guard = back.borrow();
        let ext = match &*guard {
            Obj::Extern(e) => e,
            other => panic!("expected externalizable, got {:?}", other),
        };
        assert_eq!(ext.body.as_any().downcast_ref::<Point>().unwrap().x, 7);
    }

    #[test]
    fn test_write_replace_and_read_resolve() {
        let (registry, m) = empty_grid();
        registry.register(
            ClassSpec::serializable("t.Heavy")
                .level(LevelSpec::new("t.Heavy").field("payload", FieldKind::Long))
                .write_replace(Arc::new(|obj: &ObjRef| {
                    let payload = match obj.borrow().as_struct().unwrap().get("payload")? {
                        FieldValue::Long(v) => v,
                        other => panic!("unexpected {:?}", other),
                    };
                    Ok(Obj::Long(payload).into_ref())
                }))
                .build(),
        );
        registry.register(
            ClassSpec::serializable("t.Proxy")
                .level(LevelSpec::new("t.Proxy").field("v", FieldKind::Int))
                .read_resolve(Arc::new(|obj: &ObjRef| {
                    let v = match obj.borrow().as_struct().unwrap().get("v")? {
                        FieldValue::Int(v) => v,
                        other => panic!("unexpected {:?}", other),
                    };
                    Ok(Obj::Int(v * 10).into_ref())
                }))
                .build(),
        );

        // writeReplace: the wire carries the replacement, not the object.
        let heavy = StructBuilder::new(&registry, "t.Heavy")
            .unwrap()
            .set("payload", 99i64)
            .unwrap()
            .build();
        let bytes = m.marshal(&heavy).unwrap();
        let back = m.unmarshal(&bytes, registry.as_ref()).unwrap();
        assert_eq!(*back.borrow(), Obj::Long(99));

        // readResolve: unmarshal returns the resolved object.
        let proxy = StructBuilder::new(&registry, "t.Proxy")
            .unwrap()
            .set("v", 4)
            .unwrap()
            .build();
        let bytes = m.marshal(&proxy).unwrap();
        let back = m.unmarshal(&bytes, registry.as_ref()).unwrap();
        assert_eq!(*back.borrow(), Obj::Int(40));
    }

    #[test]
    fn test_write_and_read_hooks_with_extra_payload() {
        let (registry, m) = empty_grid();
        let write_hook: WriteObjectFn = Arc::new(|_obj, out| {
            out.default_write_fields()?;
            out.write_int(0x5AFE)
        });
        let read_hook: ReadObjectFn = Arc::new(|_obj, input| {
            input.default_read_fields()?;
            let marker = input.read_int()?;
            if marker != 0x5AFE {
                return Err(MarshalError::Protocol("bad trailer marker".to_string()));
            }
            Ok(())
        });
        registry.register(
            ClassSpec::serializable("t.Hooked")
                .level(
                    LevelSpec::new("t.Hooked")
                        .field("x", FieldKind::Int)
                        .write_hook(write_hook)
                        .read_hook(read_hook),
                )
                .build(),
        );

        let obj = StructBuilder::new(&registry, "t.Hooked")
            .unwrap()
            .set("x", 12)
            .unwrap()
            .build();
        let back = round_trip(&m, &registry, &obj);
        assert_eq!(*back.borrow(), *obj.borrow());
    }

    #[test]
    fn test_read_fields_by_name_protocol() {
        let (registry, m) = empty_grid();
        let write_hook: WriteObjectFn = Arc::new(|_obj, out| out.default_write_fields());
        let read_hook: ReadObjectFn = Arc::new(|obj, input| {
            let fields = input.read_fields()?;
            let doubled = match fields.get("x") {
                Some(FieldValue::Int(v)) => v * 2,
                other => panic!("unexpected {:?}", other),
            };
            obj.borrow_mut()
                .as_struct_mut()
                .unwrap()
                .set("x", doubled)
        });
        registry.register(
            ClassSpec::serializable("t.GetField")
                .level(
                    LevelSpec::new("t.GetField")
                        .field("x", FieldKind::Int)
                        .write_hook(write_hook)
                        .read_hook(read_hook),
                )
                .build(),
        );

        let obj = StructBuilder::new(&registry, "t.GetField")
            .unwrap()
            .set("x", 21)
            .unwrap()
            .build();
        let back = round_trip(&m, &registry, &obj);
        assert_eq!(
            back.borrow().as_struct().unwrap().get("x").unwrap(),
            FieldValue::Int(42)
        );
    }

    #[test]
    fn test_hierarchy_base_fields_first() {
        let (registry, m) = empty_grid();
        registry.register(
            ClassSpec::serializable("t.Leaf")
                .level(LevelSpec::new("t.Base").field("base", FieldKind::Int))
                .level(LevelSpec::new("t.Leaf").field("leaf", FieldKind::Int))
                .build(),
        );
        let obj = StructBuilder::new(&registry, "t.Leaf")
            .unwrap()
            .set("base", 1)
            .unwrap()
            .set("leaf", 2)
            .unwrap()
            .build();
        let back = round_trip(&m, &registry, &obj);
        assert_eq!(*back.borrow(), *obj.borrow());
    }

    #[test]
    fn test_persistent_override_phantom_round_trip() {
        let (registry, m) = empty_grid();
        registry.register(
            ClassSpec::serializable("t.Ov")
                .level(
                    LevelSpec::new("t.Ov")
                        .field("real", FieldKind::Int)
                        .persistent_fields([("ghost", FieldKind::Long), ("real", FieldKind::Int)]),
                )
                .build(),
        );
        let obj = StructBuilder::new(&registry, "t.Ov")
            .unwrap()
            .set("real", 8)
            .unwrap()
            .build();
        let back = round_trip(&m, &registry, &obj);
        assert_eq!(
            back.borrow().as_struct().unwrap().get("real").unwrap(),
            FieldValue::Int(8)
        );
    }

    #[derive(Debug, Default)]
    struct Telemetry {
        node: i64,
        label: String,
    }

    impl MarshalAware for Telemetry {
        fn write_fields(&self, writer: &mut dyn FieldWriter) -> Result<()> {
            writer.write_long("node", self.node)?;
            writer.write_obj("label", &Obj::Str(self.label.clone()).into_ref())
        }

        fn read_fields(&mut self, reader: &mut dyn FieldReader) -> Result<()> {
            // Intentionally out of write order: reads go through the footer.
            let label = reader.read_obj("label")?;
            self.label = match &*label.borrow() {
                Obj::Str(s) => s.clone(),
                other => panic!("unexpected {:?}", other),
            };
            self.node = reader.read_long("node")?;
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn aware_grid() -> (Arc<ClassRegistry>, Marshaller) {
        let registry = Arc::new(ClassRegistry::new());
        registry.register(ClassSpec::marshal_aware(
            "t.Telemetry",
            Arc::new(|| Box::new(Telemetry::default())),
        ));
        let m = Marshaller::new(registry.clone())
            .unwrap()
            .with_indexing_handler(Arc::new(IndexingHandler::new()));
        (registry, m)
    }

    #[test]
    fn test_marshal_aware_round_trip_out_of_order_reads() {
        let (registry, m) = aware_grid();
        let obj = Obj::Aware(crate::object::AwareObj {
            class: "t.Telemetry".to_string(),
            body: Box::new(Telemetry {
                node: 31,
                label: "edge".to_string(),
            }),
        })
        .into_ref();
        let bytes = m.marshal(&obj).unwrap();
        let back = m.unmarshal(&bytes, registry.as_ref()).unwrap();
        let guard = back.borrow();
        let aware = match &*guard {
            Obj::Aware(a) => a,
            other => panic!("expected aware, got {:?}", other),
        };
        let telemetry = aware.body.as_any().downcast_ref::<Telemetry>().unwrap();
        assert_eq!(telemetry.node, 31);
        assert_eq!(telemetry.label, "edge");
    }

    #[test]
    fn test_marshal_aware_publishes_metadata() {
        let (_registry, m) = aware_grid();
        let obj = Obj::Aware(crate::object::AwareObj {
            class: "t.Telemetry".to_string(),
            body: Box::new(Telemetry::default()),
        })
        .into_ref();
        m.marshal(&obj).unwrap();

        let idx = m.indexing_handler().unwrap();
        let type_id = crate::context::resolve_type_id("t.Telemetry", None);
        assert_eq!(
            idx.metadata().field_names(type_id).unwrap(),
            vec!["node", "label"]
        );
    }

    fn indexed_grid() -> (Arc<ClassRegistry>, Marshaller) {
        let registry = Arc::new(ClassRegistry::new());
        registry.register(person_spec());
        let m = Marshaller::new(registry.clone())
            .unwrap()
            .with_indexing_handler(Arc::new(IndexingHandler::new()));
        (registry, m)
    }

    #[test]
    fn test_has_field_over_raw_bytes() {
        let (registry, m) = indexed_grid();
        let obj = StructBuilder::new(&registry, "t.Person")
            .unwrap()
            .set("age", 30)
            .unwrap()
            .set("name", "Lin")
            .unwrap()
            .build();
        let bytes = m.marshal(&obj).unwrap();
        assert!(m.has_field("age", &bytes, 0, bytes.len()).unwrap());
        assert!(m.has_field("name", &bytes, 0, bytes.len()).unwrap());
        assert!(!m.has_field("salary", &bytes, 0, bytes.len()).unwrap());
    }

    #[test]
    fn test_read_field_matches_source_values() {
        let (registry, m) = indexed_grid();
        let obj = StructBuilder::new(&registry, "t.Person")
            .unwrap()
            .set("age", 30)
            .unwrap()
            .set("name", "Lin")
            .unwrap()
            .build();
        let bytes = m.marshal(&obj).unwrap();

        let age = m
            .read_field("age", &bytes, 0, bytes.len(), registry.as_ref(), None)
            .unwrap();
        assert_eq!(*age.as_value().unwrap().borrow(), Obj::Int(30));

        let name = m
            .read_field("name", &bytes, 0, bytes.len(), registry.as_ref(), None)
            .unwrap();
        assert_eq!(
            *name.as_value().unwrap().borrow(),
            Obj::Str("Lin".to_string())
        );

        let err = m
            .read_field("salary", &bytes, 0, bytes.len(), registry.as_ref(), None)
            .unwrap_err();
        assert!(matches!(err, MarshalError::FieldNotFound(_)));
    }

    #[test]
    fn test_read_field_chases_shared_reference_handles() {
        let registry = Arc::new(ClassRegistry::new());
        registry.register(
            ClassSpec::serializable("t.Pair")
                .level(
                    LevelSpec::new("t.Pair")
                        .field("a", FieldKind::Other)
                        .field("b", FieldKind::Other),
                )
                .build(),
        );
        let m = Marshaller::new(registry.clone())
            .unwrap()
            .with_indexing_handler(Arc::new(IndexingHandler::new()));

        let shared = Obj::Str("both".to_string()).into_ref();
        let obj = StructBuilder::new(&registry, "t.Pair")
            .unwrap()
            .set("a", shared.clone())
            .unwrap()
            .set("b", shared)
            .unwrap()
            .build();
        let bytes = m.marshal(&obj).unwrap();

        // Field "b" was written as a handle back to "a"'s value.
        let b = m
            .read_field("b", &bytes, 0, bytes.len(), registry.as_ref(), None)
            .unwrap();
        assert_eq!(*b.as_value().unwrap().borrow(), Obj::Str("both".to_string()));
    }

    #[test]
    fn test_read_field_keeps_indexable_value_binary() {
        let registry = Arc::new(ClassRegistry::new());
        registry.register(person_spec());
        registry.register(
            ClassSpec::serializable("t.Employee")
                .level(
                    LevelSpec::new("t.Employee")
                        .field("person", FieldKind::Other)
                        .field("salary", FieldKind::Long),
                )
                .build(),
        );
        let m = Marshaller::new(registry.clone())
            .unwrap()
            .with_indexing_handler(Arc::new(IndexingHandler::new()));

        let person = StructBuilder::new(&registry, "t.Person")
            .unwrap()
            .set("age", 52)
            .unwrap()
            .set("name", "Bo")
            .unwrap()
            .build();
        let employee = StructBuilder::new(&registry, "t.Employee")
            .unwrap()
            .set("person", person.clone())
            .unwrap()
            .set("salary", 1000i64)
            .unwrap()
            .build();
        let bytes = m.marshal(&employee).unwrap();

        let ctx = CacheObjectContext::new();
        let field = m
            .read_field("person", &bytes, 0, bytes.len(), registry.as_ref(), Some(&ctx))
            .unwrap();
        let raw = field.as_raw().expect("indexable field stays binary");

        // The wrapper serves nested lookups without parsing.
        assert!(raw.has_field(&m, "age").unwrap());
        let age = raw
            .read_field(&m, "age", registry.as_ref(), None)
            .unwrap();
        assert_eq!(*age.as_value().unwrap().borrow(), Obj::Int(52));

        let full = raw.deserialize(&m, registry.as_ref()).unwrap();
        assert_eq!(*full.borrow(), *person.borrow());
    }

    #[test]
    fn test_hooked_class_is_not_indexable() {
        let registry = Arc::new(ClassRegistry::new());
        let write_hook: WriteObjectFn = Arc::new(|_obj, out| out.default_write_fields());
        let read_hook: ReadObjectFn = Arc::new(|_obj, input| input.default_read_fields());
        registry.register(
            ClassSpec::serializable("t.Hooked")
                .level(
                    LevelSpec::new("t.Hooked")
                        .field("x", FieldKind::Int)
                        .write_hook(write_hook)
                        .read_hook(read_hook),
                )
                .build(),
        );
        let m = Marshaller::new(registry.clone())
            .unwrap()
            .with_indexing_handler(Arc::new(IndexingHandler::new()));
        let obj = StructBuilder::new(&registry, "t.Hooked")
            .unwrap()
            .set("x", 5)
            .unwrap()
            .build();
        let bytes = m.marshal(&obj).unwrap();
        assert!(!m.has_field("x", &bytes, 0, bytes.len()).unwrap());
    }

    #[test]
    fn test_marshal_to_sink_and_unmarshal_slice() {
        let (registry, m) = empty_grid();
        let obj = Obj::Str("framed".to_string()).into_ref();
        let mut framed = vec![0xEE, 0xEE];
        m.marshal_to(&obj, &mut framed).unwrap();
        framed.push(0xEE);

        let back = m
            .unmarshal_slice(&framed, 2, framed.len() - 3, registry.as_ref())
            .unwrap();
        assert_eq!(*back.borrow(), *obj.borrow());
    }

    #[test]
    fn test_pooled_mode_round_trip() {
        let registry = Arc::new(ClassRegistry::new());
        registry.register(person_spec());
        let m = Marshaller::new(registry.clone()).unwrap().with_pool_size(2);
        let obj = StructBuilder::new(&registry, "t.Person")
            .unwrap()
            .set("age", 3)
            .unwrap()
            .build();
        for _ in 0..8 {
            let back = round_trip(&m, &registry, &obj);
            assert_eq!(*back.borrow(), *obj.borrow());
        }
    }

    #[test]
    fn test_truncated_input_rejected() {
        let (registry, m) = empty_grid();
        let bytes = m.marshal(&Obj::Long(1).into_ref()).unwrap();
        let err = m
            .unmarshal(&bytes[..bytes.len() - 2], registry.as_ref())
            .unwrap_err();
        assert!(matches!(err, MarshalError::Protocol(_)));
    }

    #[test]
    fn test_handle_to_unwritten_position_rejected() {
        let (registry, m) = empty_grid();
        // HANDLE tag followed by a position nothing was written at.
        let bytes = [1u8, 9, 0, 0, 0];
        let err = m.unmarshal(&bytes, registry.as_ref()).unwrap_err();
        assert!(matches!(err, MarshalError::Protocol(_)));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let (registry, m) = empty_grid();
        let err = m.unmarshal(&[200u8], registry.as_ref()).unwrap_err();
        assert!(matches!(err, MarshalError::Protocol(_)));
    }

    #[test]
    fn test_undeploy_evicts_descriptors_then_rebuilds() {
        let (registry, m) = empty_grid();
        registry.register(person_spec());
        let obj = StructBuilder::new(&registry, "t.Person")
            .unwrap()
            .set("age", 1)
            .unwrap()
            .build();
        let before = m.marshal(&obj).unwrap();

        m.on_undeploy(registry.loader_id());

        // Descriptors rebuild on demand; behavior is unchanged.
        let after = m.marshal(&obj).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_concurrent_marshalling_matches_sequential() {
        let registry = Arc::new(ClassRegistry::new());
        registry.register(person_spec());
        let m = Arc::new(Marshaller::new(registry.clone()).unwrap());

        let make = |registry: &ClassRegistry| {
            StructBuilder::new(registry, "t.Person")
                .unwrap()
                .set("age", 23)
                .unwrap()
                .set("name", "Kim")
                .unwrap()
                .build()
        };
        let baseline = m.marshal(&make(&registry)).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..32 {
                let m = m.clone();
                let registry = registry.clone();
                let baseline = baseline.clone();
                scope.spawn(move || {
                    for _ in 0..16 {
                        let bytes = m.marshal(&make(&registry)).unwrap();
                        assert_eq!(bytes, baseline);
                        let back = m.unmarshal(&bytes, registry.as_ref()).unwrap();
                        assert_eq!(
                            back.borrow().as_struct().unwrap().get("age").unwrap(),
                            FieldValue::Int(23)
                        );
                    }
                });
            }
        });
    }

    #[test]
    fn test_marshaller_is_send_sync() {
        fn assert_bounds<T: Send + Sync>() {}
        assert_bounds::<Marshaller>();
    }
}
