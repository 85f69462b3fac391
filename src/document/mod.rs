mod builder;
mod model;
mod validate;

pub use builder::{build_document, ConfigurationBuilder, DEFAULT_MODEL, DEFAULT_MODULE_NAME};
pub use model::{ComponentSpec, Configuration, ModuleSpec};
