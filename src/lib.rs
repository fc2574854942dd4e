//! Optimized binary object marshaller for an in-memory data grid.
//!
//! Serializes heterogeneous object graphs to a compact tagged binary form
//! and reconstructs them on remote nodes, replacing generic object
//! serialization with a descriptor-driven walk that is roughly an order of
//! magnitude faster and supports partial field extraction from a
//! serialized blob without deserializing it.
//!
//! Classes are registered up front (the crate's stand-in for runtime
//! reflection); values are graphs of [`ObjRef`] nodes, with shared
//! references and cycles preserved through per-stream handle tables.
//!
//! ```
//! use gridmarsh::{ClassRegistry, ClassSpec, FieldKind, LevelSpec, Marshaller, StructBuilder};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(ClassRegistry::new());
//! registry.register(
//!     ClassSpec::serializable("acme.Person")
//!         .level(
//!             LevelSpec::new("acme.Person")
//!                 .field("age", FieldKind::Int)
//!                 .field("name", FieldKind::Other),
//!         )
//!         .build(),
//! );
//!
//! let marshaller = Marshaller::new(registry.clone()).unwrap();
//! let person = StructBuilder::new(&registry, "acme.Person")
//!     .unwrap()
//!     .set("age", 34)
//!     .unwrap()
//!     .set("name", "Ada")
//!     .unwrap()
//!     .build();
//!
//! let bytes = marshaller.marshal(&person).unwrap();
//! let back = marshaller.unmarshal(&bytes, registry.as_ref()).unwrap();
//! assert_eq!(*back.borrow(), *person.borrow());
//! ```

#![warn(missing_docs)]

pub mod context;
pub mod descriptor;
pub mod error;
pub mod index;
pub mod marshaller;
pub mod object;
pub mod registry;
pub mod stream;

pub use context::{IdMapper, LocalMarshallerContext, MarshallerContext};
pub use descriptor::{ClassDescriptor, FieldKind, TypeTag};
pub use error::{ErrorCategory, MarshalError, Result};
pub use index::{
    CacheObject, CacheObjectContext, FieldResult, FieldSchema, IndexingHandler, MetadataHandler,
};
pub use marshaller::{Marshaller, ProtocolVersion};
pub use object::{
    Externalizable, FieldReader, FieldValue, FieldWriter, MarshalAware, Obj, ObjRef, StructBuilder,
    StructObj,
};
pub use registry::{ClassRegistry, ClassResolver, ClassSpec, LevelSpec, LoaderId};
pub use stream::{DataInput, DataOutput, ObjectInput, ObjectOutput};
