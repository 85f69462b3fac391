use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::locator::AmbiguityPolicy;
use crate::poll::PollSettings;
use crate::runtime::RuntimeSettings;

/// Upper bound for every timing value: one day
const MAX_TIMING_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HarnessConfig {
    pub artifact: ArtifactConfig,
    pub component: ComponentConfig,
    pub module: ModuleConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ArtifactConfig {
    /// Directory holding the packaged module
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Pre-extracted entry point, relative to `base_dir`
    #[serde(default = "default_extracted_path")]
    pub extracted_path: PathBuf,

    /// Glob for single-file archives inside `base_dir`
    #[serde(default = "default_archive_pattern")]
    pub archive_pattern: String,

    /// What to do when the archive glob matches more than one file
    #[serde(default)]
    pub on_ambiguous: AmbiguityPolicy,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ComponentConfig {
    #[serde(default = "default_component_name")]
    pub name: String,

    #[serde(default = "default_component_api")]
    pub api: String,

    #[serde(default = "default_component_model")]
    pub model: String,

    /// Driver attributes passed through to the component
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ModuleConfig {
    #[serde(default = "default_module_name")]
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TimingConfig {
    /// Deadline for each polled check
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Spacing between polled attempts
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Outer deadline for the whole scenario
    #[serde(default = "default_scenario_timeout_secs")]
    pub scenario_timeout_secs: u64,

    /// Deadline for launching modules and binding components
    #[serde(default = "default_bootstrap_timeout_secs")]
    pub bootstrap_timeout_secs: u64,

    /// Deadline for a single capability call
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Deadline for tearing the runtime down before modules are killed
    #[serde(default = "default_teardown_timeout_secs")]
    pub teardown_timeout_secs: u64,
}

impl HarnessConfig {
    /// Load configuration from the default file name plus environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("csi-cam-harness.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default(
                "artifact.base_dir",
                default_base_dir().to_string_lossy().to_string(),
            )?
            .set_default(
                "artifact.extracted_path",
                default_extracted_path().to_string_lossy().to_string(),
            )?
            .set_default("artifact.archive_pattern", default_archive_pattern())?
            .set_default("artifact.on_ambiguous", "first_sorted")?
            .set_default("component.name", default_component_name())?
            .set_default("component.api", default_component_api())?
            .set_default("component.model", default_component_model())?
            .set_default("module.name", default_module_name())?
            .set_default("timing.poll_timeout_ms", default_poll_timeout_ms())?
            .set_default("timing.poll_interval_ms", default_poll_interval_ms())?
            .set_default(
                "timing.scenario_timeout_secs",
                default_scenario_timeout_secs(),
            )?
            .set_default(
                "timing.bootstrap_timeout_secs",
                default_bootstrap_timeout_secs(),
            )?
            .set_default("timing.call_timeout_ms", default_call_timeout_ms())?
            .set_default(
                "timing.teardown_timeout_secs",
                default_teardown_timeout_secs(),
            )?
            .add_source(File::with_name(&path_str).required(false))
            // CSI_HARNESS__TIMING__POLL_TIMEOUT_MS=10000
            .add_source(Environment::with_prefix("CSI_HARNESS").separator("__"))
            .build()?;

        let config: HarnessConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.artifact.base_dir.as_os_str().is_empty() {
            return Err(ConfigError::Message(
                "Artifact base_dir must not be empty".to_string(),
            ));
        }

        if self.artifact.archive_pattern.is_empty() {
            return Err(ConfigError::Message(
                "Artifact archive_pattern must not be empty".to_string(),
            ));
        }

        if self.component.name.trim().is_empty() {
            return Err(ConfigError::Message(
                "Component name must not be empty".to_string(),
            ));
        }

        if self.module.name.trim().is_empty() {
            return Err(ConfigError::Message(
                "Module name must not be empty".to_string(),
            ));
        }

        if self.timing.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if self.timing.scenario_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Scenario timeout must be greater than 0".to_string(),
            ));
        }

        if self.timing.bootstrap_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Bootstrap timeout must be greater than 0".to_string(),
            ));
        }

        if self.timing.call_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Call timeout must be greater than 0".to_string(),
            ));
        }

        if self.timing.teardown_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Teardown timeout must be greater than 0".to_string(),
            ));
        }

        let timings = [
            ("poll_timeout_ms", self.timing.poll_timeout_ms / 1000),
            ("poll_interval_ms", self.timing.poll_interval_ms / 1000),
            ("scenario_timeout_secs", self.timing.scenario_timeout_secs),
            ("bootstrap_timeout_secs", self.timing.bootstrap_timeout_secs),
            ("call_timeout_ms", self.timing.call_timeout_ms / 1000),
            ("teardown_timeout_secs", self.timing.teardown_timeout_secs),
        ];
        for (name, secs) in timings {
            if secs > MAX_TIMING_SECS {
                return Err(ConfigError::Message(format!(
                    "Timing value {} must not exceed {} seconds",
                    name, MAX_TIMING_SECS
                )));
            }
        }

        Ok(())
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            timeout: Duration::from_millis(self.timing.poll_timeout_ms),
            interval: Duration::from_millis(self.timing.poll_interval_ms),
        }
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            call_timeout: Duration::from_millis(self.timing.call_timeout_ms),
            teardown_timeout: self.teardown_timeout(),
        }
    }

    pub fn scenario_timeout(&self) -> Duration {
        Duration::from_secs(self.timing.scenario_timeout_secs)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.timing.bootstrap_timeout_secs)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.timing.teardown_timeout_secs)
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            artifact: ArtifactConfig {
                base_dir: default_base_dir(),
                extracted_path: default_extracted_path(),
                archive_pattern: default_archive_pattern(),
                on_ambiguous: AmbiguityPolicy::default(),
            },
            component: ComponentConfig {
                name: default_component_name(),
                api: default_component_api(),
                model: default_component_model(),
                attributes: Map::new(),
            },
            module: ModuleConfig {
                name: default_module_name(),
            },
            timing: TimingConfig {
                poll_timeout_ms: default_poll_timeout_ms(),
                poll_interval_ms: default_poll_interval_ms(),
                scenario_timeout_secs: default_scenario_timeout_secs(),
                bootstrap_timeout_secs: default_bootstrap_timeout_secs(),
                call_timeout_ms: default_call_timeout_ms(),
                teardown_timeout_secs: default_teardown_timeout_secs(),
            },
        }
    }
}

// Default value functions
fn default_base_dir() -> PathBuf {
    PathBuf::from("etc")
}
fn default_extracted_path() -> PathBuf {
    PathBuf::from("squashfs-root/AppRun")
}
fn default_archive_pattern() -> String {
    "*.AppImage".to_string()
}

fn default_component_name() -> String {
    "csi-cam-1".to_string()
}
fn default_component_api() -> String {
    crate::camera::CAMERA_API.to_string()
}
fn default_component_model() -> String {
    "viam:camera:csi-pi".to_string()
}

fn default_module_name() -> String {
    "viam_csi-cam-pi".to_string()
}

fn default_poll_timeout_ms() -> u64 {
    5_000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_scenario_timeout_secs() -> u64 {
    60
}
fn default_bootstrap_timeout_secs() -> u64 {
    30
}
fn default_call_timeout_ms() -> u64 {
    2_000
}
fn default_teardown_timeout_secs() -> u64 {
    10
}
