mod instance;
mod module;
#[cfg(test)]
mod tests;

pub use instance::{RuntimeInstance, RuntimeSettings, TeardownReport};

pub(crate) use module::ModuleProcess;
