mod checks;
mod report;

#[cfg(test)]
mod tests;

pub use checks::{
    check_image, check_images, check_properties, run_checks, GET_IMAGE, GET_IMAGES,
    GET_PROPERTIES,
};
pub use report::{CheckOutcome, CheckStatus, ScenarioReport};

use crate::camera::client_for;
use crate::config::HarnessConfig;
use crate::document::{Configuration, ConfigurationBuilder};
use crate::error::Result;
use crate::locator::ArtifactLocator;
use crate::poll::{deadline_after, PollSettings};
use crate::runtime::{RuntimeInstance, RuntimeSettings};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Everything one scenario run needs, passed in explicitly
#[derive(Debug, Clone)]
pub struct ScenarioSettings {
    pub locator: ArtifactLocator,
    pub component_name: String,
    pub api: String,
    pub model: String,
    pub module_name: String,
    pub attributes: Map<String, Value>,
    pub runtime: RuntimeSettings,
    pub poll: PollSettings,
    pub scenario_timeout: Duration,
    pub bootstrap_timeout: Duration,
}

impl ScenarioSettings {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            locator: ArtifactLocator::from_config(&config.artifact),
            component_name: config.component.name.clone(),
            api: config.component.api.clone(),
            model: config.component.model.clone(),
            module_name: config.module.name.clone(),
            attributes: config.component.attributes.clone(),
            runtime: config.runtime_settings(),
            poll: config.poll_settings(),
            scenario_timeout: config.scenario_timeout(),
            bootstrap_timeout: config.bootstrap_timeout(),
        }
    }

    /// The one-component, one-module configuration for `executable`
    pub fn configuration(&self, executable: &Path) -> Result<Configuration> {
        ConfigurationBuilder::new(self.component_name.clone(), executable)
            .api(self.api.clone())
            .model(self.model.clone())
            .module_name(self.module_name.clone())
            .attributes(self.attributes.clone())
            .build()
    }
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default())
    }
}

/// Locate the module, bootstrap a runtime around it, run every check and tear down.
///
/// Never fails as a whole: setup errors, check failures and teardown errors
/// all end up in the report.
pub async fn run_scenario(settings: &ScenarioSettings) -> ScenarioReport {
    let started = Instant::now();
    let deadline = deadline_after(started, settings.scenario_timeout);
    let mut report = ScenarioReport::default();

    let document = match settings
        .locator
        .locate()
        .and_then(|executable| settings.configuration(&executable))
        .and_then(|configuration| configuration.to_document())
    {
        Ok(document) => document,
        Err(e) => {
            error!("Scenario setup failed: {}", e);
            report.setup_error = Some(e);
            report.elapsed = started.elapsed();
            return report;
        }
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    let mut instance = match RuntimeInstance::bootstrap_document(
        &document,
        settings.runtime,
        settings.bootstrap_timeout.min(remaining),
    )
    .await
    {
        Ok(instance) => instance,
        Err(e) => {
            error!("Runtime bootstrap failed: {}", e);
            report.setup_error = Some(e);
            report.elapsed = started.elapsed();
            return report;
        }
    };

    match client_for(&instance, &settings.component_name) {
        Ok(camera) => {
            info!("Running checks against '{}'", camera.name());
            report.checks = run_checks(&camera, settings.poll, deadline).await;
        }
        Err(e) => {
            error!("{}", e);
            report.setup_error = Some(e);
        }
    }

    // Teardown runs on its own deadline even when the scenario is out of time
    let teardown = instance.close(settings.runtime.teardown_timeout).await;
    if !teardown.is_clean() {
        warn!("Teardown reported {} error(s)", teardown.errors.len());
    }
    report.teardown_errors = teardown.errors;
    report.elapsed = started.elapsed();
    report
}
