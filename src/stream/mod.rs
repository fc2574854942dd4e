//! Object stream machinery: buffers, the write and read paths, and the
//! stream handle registry.

mod data_input;
mod data_output;
mod object_input;
mod object_output;
mod pool;

pub use data_input::{ByteDataInput, DataInput};
pub use data_output::{ByteDataOutput, DataOutput};
pub use object_input::{FieldMap, ObjectInput};
pub use object_output::ObjectOutput;

pub(crate) use object_input::ObjectInputStream;
pub(crate) use object_output::ObjectOutputStream;
pub(crate) use pool::StreamRegistry;

use crate::context::{resolve_type_id, IdMapper, MarshallerContext};
use crate::descriptor::{ClassDescriptor, DescriptorCache};
use crate::error::Result;
use crate::index::IndexingHandler;
use crate::registry::ClassResolver;
use std::collections::HashSet;
use std::sync::Arc;

/// Configuration bundle one stream invocation runs under.
#[derive(Clone, Copy)]
pub(crate) struct StreamContext<'a> {
    pub(crate) cache: &'a DescriptorCache,
    pub(crate) ctx: &'a dyn MarshallerContext,
    pub(crate) mapper: Option<&'a dyn IdMapper>,
    pub(crate) exclusions: &'a HashSet<String>,
    pub(crate) resolver: &'a dyn ClassResolver,
    pub(crate) require_serializable: bool,
    pub(crate) idx: Option<&'a IndexingHandler>,
}

impl StreamContext<'_> {
    /// Resolves a class name to its cached descriptor.
    pub(crate) fn descriptor(&self, name: &str) -> Result<Arc<ClassDescriptor>> {
        let spec = self.resolver.resolve(name)?;
        self.cache.resolve(spec, self.ctx, self.mapper, self.exclusions)
    }

    /// Resolves the wire type id for a bare class name (class literals and
    /// array components): the resolved id if the context accepts the
    /// registration, else `0` meaning "name travels inline".
    pub(crate) fn wire_id_for_name(&self, name: &str) -> Result<i32> {
        let id = resolve_type_id(name, self.mapper);
        Ok(if self.ctx.register_class(id, name)? {
            id
        } else {
            0
        })
    }
}
