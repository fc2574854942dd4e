//! Class registration: the marshaller's stand-in for runtime reflection.
//!
//! A [`ClassSpec`] describes one named class: its hierarchy levels, field
//! lists, serialization hooks, or enum constant table. A [`ClassRegistry`]
//! owns the specs registered by one deployment unit and plays the role of a
//! class loader: it resolves names during unmarshalling, and its
//! [`LoaderId`] is the unit of undeploy.

use crate::descriptor::FieldKind;
use crate::error::{MarshalError, Result};
use crate::object::{Externalizable, MarshalAware, ObjRef, StructObj};
use crate::stream::{ObjectInput, ObjectOutput};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of a class registry, the unit of undeploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderId(u64);

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

impl LoaderId {
    fn next() -> LoaderId {
        LoaderId(NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Placeholder id carried by specs that were never registered.
    pub(crate) const UNREGISTERED: LoaderId = LoaderId(0);
}

/// Constructor closure for externalizable classes.
pub type ExternCtor = Arc<dyn Fn() -> Box<dyn Externalizable> + Send + Sync>;

/// Constructor closure for marshal-aware classes.
pub type AwareCtor = Arc<dyn Fn() -> Box<dyn MarshalAware> + Send + Sync>;

/// `writeReplace`/`readResolve`-style substitution hook.
pub type ReplaceFn = Arc<dyn Fn(&ObjRef) -> Result<ObjRef> + Send + Sync>;

/// Per-level custom write hook (`writeObject` analog).
pub type WriteObjectFn =
    Arc<dyn Fn(&ObjRef, &mut ObjectOutput<'_, '_>) -> Result<()> + Send + Sync>;

/// Per-level custom read hook (`readObject` analog).
pub type ReadObjectFn =
    Arc<dyn Fn(&ObjRef, &mut ObjectInput<'_, '_>) -> Result<()> + Send + Sync>;

/// A declared field at one hierarchy level.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub(crate) name: String,
    pub(crate) kind: FieldKind,
    pub(crate) transient: bool,
}

/// An entry of a persistent-fields override. The named field may have no
/// physical slot; such phantom fields write as zero and are ignored on read.
#[derive(Debug, Clone)]
pub struct PersistentField {
    pub(crate) name: String,
    pub(crate) kind: FieldKind,
}

/// One hierarchy level of a serializable class, base levels first.
pub struct LevelSpec {
    pub(crate) class: String,
    pub(crate) fields: Vec<FieldSpec>,
    pub(crate) persistent_override: Option<Vec<PersistentField>>,
    pub(crate) write_object: Option<WriteObjectFn>,
    pub(crate) read_object: Option<ReadObjectFn>,
}

impl LevelSpec {
    /// Starts a level for the class with the given name.
    pub fn new(class: impl Into<String>) -> LevelSpec {
        LevelSpec {
            class: class.into(),
            fields: Vec::new(),
            persistent_override: None,
            write_object: None,
            read_object: None,
        }
    }

    /// Declares a field.
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> LevelSpec {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            transient: false,
        });
        self
    }

    /// Declares a transient field: it exists in the instance but is never
    /// serialized (unless a persistent-fields override names it).
    pub fn transient_field(mut self, name: impl Into<String>, kind: FieldKind) -> LevelSpec {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            transient: true,
        });
        self
    }

    /// Installs an authoritative persistent-fields declaration for this
    /// level. Entries may name fields that do not physically exist.
    pub fn persistent_fields(
        mut self,
        fields: impl IntoIterator<Item = (&'static str, FieldKind)>,
    ) -> LevelSpec {
        self.persistent_override = Some(
            fields
                .into_iter()
                .map(|(name, kind)| PersistentField {
                    name: name.to_string(),
                    kind,
                })
                .collect(),
        );
        self
    }

    /// Installs a custom write hook for this level. Disables field indexing
    /// for the whole class.
    pub fn write_hook(mut self, hook: WriteObjectFn) -> LevelSpec {
        self.write_object = Some(hook);
        self
    }

    /// Installs a custom read hook for this level. Disables field indexing
    /// for the whole class.
    pub fn read_hook(mut self, hook: ReadObjectFn) -> LevelSpec {
        self.read_object = Some(hook);
        self
    }
}

impl fmt::Debug for LevelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelSpec")
            .field("class", &self.class)
            .field("fields", &self.fields)
            .field("has_write_hook", &self.write_object.is_some())
            .field("has_read_hook", &self.read_object.is_some())
            .finish()
    }
}

/// One slot of an instance's field table.
#[derive(Debug, Clone)]
pub struct SlotDef {
    /// Hierarchy level the field is declared at (0 = base).
    pub level: usize,
    /// Field name.
    pub name: String,
    /// Field kind.
    pub kind: FieldKind,
}

/// Slot layout of a serializable class: the offset analog.
///
/// Slots are assigned at registration time, hierarchy levels base-first,
/// declared order within a level. By-name lookup resolves duplicate names
/// to the leaf-most declaration.
#[derive(Debug)]
pub struct Layout {
    slots: Vec<SlotDef>,
    by_name: HashMap<String, usize>,
    by_level_name: HashMap<(usize, String), usize>,
}

impl Layout {
    fn build(levels: &[LevelSpec]) -> Layout {
        let mut slots = Vec::new();
        let mut by_name = HashMap::new();
        let mut by_level_name = HashMap::new();
        for (li, level) in levels.iter().enumerate() {
            for f in &level.fields {
                let idx = slots.len();
                slots.push(SlotDef {
                    level: li,
                    name: f.name.clone(),
                    kind: f.kind,
                });
                by_name.insert(f.name.clone(), idx);
                by_level_name.insert((li, f.name.clone()), idx);
            }
        }
        Layout {
            slots,
            by_name,
            by_level_name,
        }
    }

    /// Returns all slot definitions in layout order.
    pub fn slots(&self) -> &[SlotDef] {
        &self.slots
    }

    /// Looks a field up by name (leaf-most match).
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn slot_at_level(&self, level: usize, name: &str) -> Option<usize> {
        self.by_level_name.get(&(level, name.to_string())).copied()
    }
}

/// A serializable class: per-level field groups plus the slot layout.
pub struct SerializableSpec {
    pub(crate) declares_serializable: bool,
    pub(crate) levels: Vec<LevelSpec>,
    pub(crate) layout: Layout,
}

/// The kind-specific part of a class spec.
pub enum SpecKind {
    /// Reflectively-walked field serialization.
    Serializable(SerializableSpec),
    /// The class writes its own wire form.
    Externalizable(ExternCtor),
    /// The class writes named, indexable fields.
    MarshalAware(AwareCtor),
    /// An enum with its constant table.
    Enum(Vec<String>),
}

/// Registered metadata for one named class.
///
/// Immutable once registered; descriptors are derived from it and cached
/// separately.
pub struct ClassSpec {
    name: Arc<str>,
    loader: LoaderId,
    write_replace: Option<ReplaceFn>,
    read_resolve: Option<ReplaceFn>,
    kind: SpecKind,
}

impl fmt::Debug for ClassSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            SpecKind::Serializable(_) => "serializable",
            SpecKind::Externalizable(_) => "externalizable",
            SpecKind::MarshalAware(_) => "marshal-aware",
            SpecKind::Enum(_) => "enum",
        };
        f.debug_struct("ClassSpec")
            .field("name", &self.name)
            .field("kind", &kind)
            .field("loader", &self.loader)
            .finish()
    }
}

impl ClassSpec {
    /// Starts a serializable class spec.
    pub fn serializable(name: impl Into<String>) -> SerializableBuilder {
        SerializableBuilder {
            name: name.into(),
            declares_serializable: true,
            levels: Vec::new(),
            write_replace: None,
            read_resolve: None,
        }
    }

    /// Creates an externalizable class spec with its no-arg constructor.
    pub fn externalizable(name: impl Into<String>, ctor: ExternCtor) -> ClassSpec {
        ClassSpec {
            name: name.into().into(),
            loader: LoaderId::UNREGISTERED,
            write_replace: None,
            read_resolve: None,
            kind: SpecKind::Externalizable(ctor),
        }
    }

    /// Creates a marshal-aware class spec with its no-arg constructor.
    pub fn marshal_aware(name: impl Into<String>, ctor: AwareCtor) -> ClassSpec {
        ClassSpec {
            name: name.into().into(),
            loader: LoaderId::UNREGISTERED,
            write_replace: None,
            read_resolve: None,
            kind: SpecKind::MarshalAware(ctor),
        }
    }

    /// Creates an enum class spec with its constant table.
    pub fn enumeration(
        name: impl Into<String>,
        constants: impl IntoIterator<Item = impl Into<String>>,
    ) -> ClassSpec {
        ClassSpec {
            name: name.into().into(),
            loader: LoaderId::UNREGISTERED,
            write_replace: None,
            read_resolve: None,
            kind: SpecKind::Enum(constants.into_iter().map(Into::into).collect()),
        }
    }

    /// Installs a `writeReplace`-style substitution hook.
    pub fn with_write_replace(mut self, hook: ReplaceFn) -> ClassSpec {
        self.write_replace = Some(hook);
        self
    }

    /// Installs a `readResolve`-style substitution hook.
    pub fn with_read_resolve(mut self, hook: ReplaceFn) -> ClassSpec {
        self.read_resolve = Some(hook);
        self
    }

    /// Returns the fully-qualified class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.name.clone()
    }

    /// Returns the registry this spec was registered with.
    pub fn loader(&self) -> LoaderId {
        self.loader
    }

    /// Returns the kind-specific part of the spec.
    pub fn kind(&self) -> &SpecKind {
        &self.kind
    }

    /// Returns the slot layout for serializable classes.
    pub fn layout(&self) -> Option<&Layout> {
        match &self.kind {
            SpecKind::Serializable(s) => Some(&s.layout),
            _ => None,
        }
    }

    pub(crate) fn serializable_spec(&self) -> Option<&SerializableSpec> {
        match &self.kind {
            SpecKind::Serializable(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn write_replace(&self) -> Option<&ReplaceFn> {
        self.write_replace.as_ref()
    }

    pub(crate) fn read_resolve(&self) -> Option<&ReplaceFn> {
        self.read_resolve.as_ref()
    }

    pub(crate) fn extern_ctor(&self) -> Option<&ExternCtor> {
        match &self.kind {
            SpecKind::Externalizable(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn aware_ctor(&self) -> Option<&AwareCtor> {
        match &self.kind {
            SpecKind::MarshalAware(c) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn enum_constants(&self) -> Option<&[String]> {
        match &self.kind {
            SpecKind::Enum(c) => Some(c),
            _ => None,
        }
    }
}

/// Builder for serializable class specs.
pub struct SerializableBuilder {
    name: String,
    declares_serializable: bool,
    levels: Vec<LevelSpec>,
    write_replace: Option<ReplaceFn>,
    read_resolve: Option<ReplaceFn>,
}

impl SerializableBuilder {
    /// Appends a hierarchy level. Levels are declared base-class first;
    /// the last level is the class itself.
    pub fn level(mut self, level: LevelSpec) -> SerializableBuilder {
        self.levels.push(level);
        self
    }

    /// Sets whether the class formally declares the serializable
    /// capability. Defaults to `true`; classes that don't are rejected on
    /// write when `require_serializable` is set.
    pub fn declares_serializable(mut self, declares: bool) -> SerializableBuilder {
        self.declares_serializable = declares;
        self
    }

    /// Installs a `writeReplace`-style substitution hook.
    pub fn write_replace(mut self, hook: ReplaceFn) -> SerializableBuilder {
        self.write_replace = Some(hook);
        self
    }

    /// Installs a `readResolve`-style substitution hook.
    pub fn read_resolve(mut self, hook: ReplaceFn) -> SerializableBuilder {
        self.read_resolve = Some(hook);
        self
    }

    /// Finishes the spec, computing the slot layout.
    pub fn build(self) -> ClassSpec {
        let layout = Layout::build(&self.levels);
        ClassSpec {
            name: self.name.into(),
            loader: LoaderId::UNREGISTERED,
            write_replace: self.write_replace,
            read_resolve: self.read_resolve,
            kind: SpecKind::Serializable(SerializableSpec {
                declares_serializable: self.declares_serializable,
                levels: self.levels,
                layout,
            }),
        }
    }
}

/// Resolves class names to specs during unmarshalling.
///
/// Supplied per-unmarshal by the caller; [`ClassRegistry`] is the standard
/// implementation.
pub trait ClassResolver {
    /// Resolves a fully-qualified class name.
    fn resolve(&self, name: &str) -> Result<Arc<ClassSpec>>;

    /// Returns the identity of this resolver for descriptor caching and
    /// undeploy.
    fn loader_id(&self) -> LoaderId;
}

/// A set of registered classes with a loader identity.
pub struct ClassRegistry {
    loader: LoaderId,
    classes: DashMap<Arc<str>, Arc<ClassSpec>>,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry {
    /// Creates an empty registry with a fresh loader identity.
    pub fn new() -> ClassRegistry {
        ClassRegistry {
            loader: LoaderId::next(),
            classes: DashMap::new(),
        }
    }

    /// Registers a class spec, stamping it with this registry's loader id.
    /// Re-registering a name replaces the previous spec.
    pub fn register(&self, mut spec: ClassSpec) -> Arc<ClassSpec> {
        spec.loader = self.loader;
        let spec = Arc::new(spec);
        self.classes.insert(spec.name_arc(), spec.clone());
        spec
    }

    /// Looks up a registered class by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<ClassSpec>> {
        self.classes.get(name).map(|e| e.value().clone())
    }

    /// Allocates a zero-initialized instance of a registered serializable
    /// class. No constructor runs.
    pub fn new_instance(&self, class: &str) -> Result<ObjRef> {
        let spec = self
            .lookup(class)
            .ok_or_else(|| MarshalError::ClassNotFound(class.to_string()))?;
        Ok(crate::object::Obj::Struct(StructObj::zeroed(spec)?).into_ref())
    }

    /// Returns the number of registered classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns `true` if no classes are registered.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("loader", &self.loader)
            .field("classes", &self.classes.len())
            .finish()
    }
}

impl ClassResolver for ClassRegistry {
    fn resolve(&self, name: &str) -> Result<Arc<ClassSpec>> {
        self.lookup(name)
            .ok_or_else(|| MarshalError::ClassNotFound(name.to_string()))
    }

    fn loader_id(&self) -> LoaderId {
        self.loader
    }
}
