use super::module::ModuleProcess;
use crate::document::{ComponentSpec, Configuration, ModuleSpec};
use crate::error::{HarnessError, Result};
use crate::poll::deadline_after;
use crate::protocol::{Request, ResponseBody};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Timeouts the runtime applies on behalf of its callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Bound on a single capability call
    pub call_timeout: Duration,
    /// Bound used when a failed bootstrap tears down what it started
    pub teardown_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(2),
            teardown_timeout: Duration::from_secs(10),
        }
    }
}

/// Errors collected while tearing a runtime down
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub errors: Vec<HarnessError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BoundComponent {
    pub api: String,
    pub model: String,
    pub module: Weak<ModuleProcess>,
}

/// A live component graph backed by module subprocesses.
///
/// Must be closed with [`RuntimeInstance::close`]; dropping it without
/// closing kills every module immediately.
#[derive(Debug)]
pub struct RuntimeInstance {
    id: Uuid,
    settings: RuntimeSettings,
    modules: Vec<Arc<ModuleProcess>>,
    components: HashMap<String, BoundComponent>,
    closed: bool,
}

impl RuntimeInstance {
    /// Turn a configuration into a running instance, all or nothing.
    ///
    /// Launching modules and binding components must finish within
    /// `deadline`. On failure everything already started is torn down and
    /// the first error is returned.
    pub async fn bootstrap(
        configuration: &Configuration,
        settings: RuntimeSettings,
        deadline: Duration,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let span = info_span!("runtime", id = %id);

        async move {
            info!(
                "Bootstrapping runtime with {} component(s) and {} module(s)",
                configuration.components.len(),
                configuration.modules.len()
            );

            let order = configuration.binding_order()?;
            configuration.check_executables()?;

            let deadline_at = deadline_after(Instant::now(), deadline);
            let mut instance = Self {
                id,
                settings,
                modules: Vec::new(),
                components: HashMap::new(),
                closed: false,
            };

            match instance.start(configuration, &order, deadline_at).await {
                Ok(()) => {
                    info!("Runtime ready");
                    Ok(instance)
                }
                Err(e) => {
                    error!("Bootstrap failed: {}", e);
                    let report = instance.close(settings.teardown_timeout).await;
                    for teardown_error in &report.errors {
                        warn!("Teardown after failed bootstrap: {}", teardown_error);
                    }
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Parse a serialized configuration document and bootstrap it
    pub async fn bootstrap_document(
        document: &str,
        settings: RuntimeSettings,
        deadline: Duration,
    ) -> Result<Self> {
        let configuration = Configuration::from_document(document)?;
        Self::bootstrap(&configuration, settings, deadline).await
    }

    async fn start(
        &mut self,
        configuration: &Configuration,
        order: &[&ComponentSpec],
        deadline: Instant,
    ) -> Result<()> {
        for module in &configuration.modules {
            match module {
                ModuleSpec::Local {
                    name,
                    executable_path,
                } => {
                    let process = ModuleProcess::launch(
                        name,
                        executable_path,
                        self.settings.call_timeout,
                        deadline,
                    )
                    .await?;
                    self.modules.push(Arc::new(process));
                }
                ModuleSpec::Registry { name, module_id } => {
                    warn!(
                        "Skipping registry module '{}' ({}): registry modules cannot be resolved locally",
                        name, module_id
                    );
                }
            }
        }

        for component in order {
            self.bind(component, deadline).await?;
        }

        Ok(())
    }

    async fn bind(&mut self, component: &ComponentSpec, deadline: Instant) -> Result<()> {
        let module = self
            .modules
            .iter()
            .find(|m| m.advertises(&component.model))
            .ok_or_else(|| {
                HarnessError::component_bind(
                    component.name.clone(),
                    format!("no loaded module advertises model '{}'", component.model),
                )
            })?;

        debug!(
            "Constructing '{}' ({}) in module '{}'",
            component.name,
            component.model,
            module.name()
        );

        let request = Request::Construct {
            name: component.name.clone(),
            api: component.api.clone(),
            model: component.model.clone(),
            attributes: component.attributes.clone(),
            depends_on: component.depends_on.clone(),
        };

        match timeout_at(deadline, module.call(request)).await {
            Ok(Ok(ResponseBody::Constructed)) => {}
            Ok(Ok(ResponseBody::Error { message })) => {
                return Err(HarnessError::component_bind(
                    component.name.clone(),
                    format!("module '{}' rejected construction: {}", module.name(), message),
                ));
            }
            Ok(Ok(other)) => {
                return Err(HarnessError::component_bind(
                    component.name.clone(),
                    format!("unexpected '{}' response to construct", other.kind()),
                ));
            }
            Ok(Err(e)) => {
                return Err(HarnessError::component_bind(
                    component.name.clone(),
                    e.to_string(),
                ));
            }
            Err(_) => {
                return Err(HarnessError::component_bind(
                    component.name.as_str(),
                    "construction did not finish before the bootstrap deadline",
                ));
            }
        }

        info!("Component '{}' bound to module '{}'", component.name, module.name());
        self.components.insert(
            component.name.clone(),
            BoundComponent {
                api: component.api.clone(),
                model: component.model.clone(),
                module: Arc::downgrade(module),
            },
        );
        Ok(())
    }

    /// Stop every module within `deadline`, killing the ones that do not exit.
    ///
    /// Errors are collected rather than returned early. Closing twice is a no-op.
    pub async fn close(&mut self, deadline: Duration) -> TeardownReport {
        if self.closed {
            debug!("Runtime {} already closed", self.id);
            return TeardownReport::default();
        }
        self.closed = true;
        self.components.clear();

        let modules = std::mem::take(&mut self.modules);
        if modules.is_empty() {
            return TeardownReport::default();
        }

        info!("Closing runtime {} ({} module(s))", self.id, modules.len());
        let deadline_at = deadline_after(Instant::now(), deadline);
        let results = join_all(modules.iter().map(|m| m.shutdown(deadline_at))).await;

        let errors: Vec<HarnessError> = results.into_iter().filter_map(|r| r.err()).collect();
        if errors.is_empty() {
            info!("Runtime {} closed", self.id);
        } else {
            for e in &errors {
                error!("{}", e);
            }
        }

        TeardownReport { errors }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn component_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.components.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    pub(crate) fn component(&self, name: &str) -> Option<&BoundComponent> {
        self.components.get(name)
    }
}

impl Drop for RuntimeInstance {
    fn drop(&mut self) {
        if !self.closed && !self.modules.is_empty() {
            warn!(
                "Runtime {} dropped without close; killing {} module(s)",
                self.id,
                self.modules.len()
            );
        }
    }
}
