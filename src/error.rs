use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Module artifact not found in {}: {reason}", base_dir.display())]
    ArtifactNotFound { base_dir: PathBuf, reason: String },

    #[error("Ambiguous module artifact in {}: {} candidates", base_dir.display(), candidates.len())]
    ArtifactAmbiguous {
        base_dir: PathBuf,
        candidates: Vec<PathBuf>,
    },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    #[error("Module '{module}' failed to launch: {reason}")]
    ModuleLaunch { module: String, reason: String },

    #[error("Component '{component}' could not be bound: {reason}")]
    ComponentBind { component: String, reason: String },

    #[error("Component lookup failed for '{component}': {reason}")]
    Lookup { component: String, reason: String },

    #[error("Capability call failed: {0}")]
    Call(#[from] CallError),

    #[error("Check '{check}' did not succeed within {timeout:?} ({attempts} attempts over {elapsed:?})")]
    DeadlineExceeded {
        check: String,
        elapsed: Duration,
        timeout: Duration,
        attempts: u32,
    },

    #[error("Teardown of module '{module}' failed: {reason}")]
    Teardown { module: String, reason: String },
}

/// Failure of a single capability call. The polling verifier treats every
/// variant as "not ready yet".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("driver reported failure: {0}")]
    Driver(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("runtime instance has been closed")]
    RuntimeClosed,

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl HarnessError {
    pub fn config_invalid<S: Into<String>>(message: S) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn module_launch<S: Into<String>>(module: S, reason: S) -> Self {
        Self::ModuleLaunch {
            module: module.into(),
            reason: reason.into(),
        }
    }

    pub fn component_bind<S: Into<String>>(component: S, reason: S) -> Self {
        Self::ComponentBind {
            component: component.into(),
            reason: reason.into(),
        }
    }

    pub fn lookup<S: Into<String>>(component: S, reason: S) -> Self {
        Self::Lookup {
            component: component.into(),
            reason: reason.into(),
        }
    }

    pub fn teardown<S: Into<String>>(module: S, reason: S) -> Self {
        Self::Teardown {
            module: module.into(),
            reason: reason.into(),
        }
    }

    /// Locator and bootstrap failures mean the scenario could not be set up;
    /// they are never retried.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::ArtifactNotFound { .. }
                | Self::ArtifactAmbiguous { .. }
                | Self::ConfigInvalid { .. }
                | Self::ModuleLaunch { .. }
                | Self::ComponentBind { .. }
                | Self::Lookup { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
