pub mod camera;
pub mod config;
pub mod document;
pub mod error;
pub mod locator;
pub mod module;
pub mod poll;
pub mod protocol;
pub mod runtime;
pub mod scenario;

pub use camera::{client_for, CameraCapability, CameraClient, ImageBytes, ImageMetadata, PropertySet};
pub use config::HarnessConfig;
pub use document::{build_document, ComponentSpec, Configuration, ConfigurationBuilder, ModuleSpec};
pub use error::{CallError, HarnessError, Result};
pub use locator::{AmbiguityPolicy, ArtifactLocator};
pub use poll::{poll_until, PollOutcome, PollSettings};
pub use runtime::{RuntimeInstance, RuntimeSettings, TeardownReport};
pub use scenario::{run_scenario, CheckOutcome, CheckStatus, ScenarioReport, ScenarioSettings};
