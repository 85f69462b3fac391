use super::model::{ComponentSpec, Configuration, ModuleSpec};
use crate::camera::CAMERA_API;
use crate::error::{HarnessError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "viam:camera:csi-pi";
pub const DEFAULT_MODULE_NAME: &str = "viam_csi-cam-pi";

/// Builder for a one-component, one-module configuration
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    component_name: String,
    executable_path: PathBuf,
    api: String,
    model: String,
    module_name: String,
    attributes: Map<String, Value>,
}

impl ConfigurationBuilder {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(component_name: S, executable_path: P) -> Self {
        Self {
            component_name: component_name.into(),
            executable_path: executable_path.into(),
            api: CAMERA_API.to_string(),
            model: DEFAULT_MODEL.to_string(),
            module_name: DEFAULT_MODULE_NAME.to_string(),
            attributes: Map::new(),
        }
    }

    pub fn api<S: Into<String>>(mut self, api: S) -> Self {
        self.api = api.into();
        self
    }

    pub fn model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = model.into();
        self
    }

    pub fn module_name<S: Into<String>>(mut self, module_name: S) -> Self {
        self.module_name = module_name.into();
        self
    }

    pub fn attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn attribute<S: Into<String>>(mut self, key: S, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Result<Configuration> {
        if self.component_name.trim().is_empty() {
            return Err(HarnessError::config_invalid("component name must not be empty"));
        }
        if self.executable_path.as_os_str().is_empty() {
            return Err(HarnessError::config_invalid("executable path must not be empty"));
        }

        let configuration = Configuration {
            components: vec![ComponentSpec {
                name: self.component_name,
                api: self.api,
                model: self.model,
                attributes: self.attributes,
                depends_on: Vec::new(),
            }],
            modules: vec![ModuleSpec::local(self.module_name, self.executable_path)],
        };
        configuration.validate()?;

        Ok(configuration)
    }

    pub fn build_document(self) -> Result<String> {
        self.build()?.to_document()
    }
}

/// Serialized configuration binding `component_name` to the module at `executable_path`
pub fn build_document(component_name: &str, executable_path: &Path) -> Result<String> {
    ConfigurationBuilder::new(component_name, executable_path).build_document()
}
