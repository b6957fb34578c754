//! Model metadata: descriptors, the inspector, the derived-type registry and
//! descriptor files.

pub mod descriptor;
pub mod file;
pub mod inspector;
pub mod registry;

pub use descriptor::{
    DefaultValue, Inheritance, ModelType, PropertyDescriptor, PropertyKind, ValueType,
};
pub use file::{load_descriptor_file, parse_descriptors};
pub use inspector::{Inspector, MetadataSource, StaticSource};
pub use registry::{Factory, RegisteredType, TypeRegistry};
