use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// One named component bound to a driver model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    pub api: String,
    pub model: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A module the runtime should load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModuleSpec {
    /// Executable on the local filesystem, launched as a subprocess
    Local {
        name: String,
        executable_path: PathBuf,
    },
    /// Reference into a module registry
    Registry { name: String, module_id: String },
}

impl ModuleSpec {
    pub fn local<S: Into<String>, P: Into<PathBuf>>(name: S, executable_path: P) -> Self {
        Self::Local {
            name: name.into(),
            executable_path: executable_path.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Local { name, .. } | Self::Registry { name, .. } => name,
        }
    }

    pub fn executable_path(&self) -> Option<&Path> {
        match self {
            Self::Local {
                executable_path, ..
            } => Some(executable_path),
            Self::Registry { .. } => None,
        }
    }
}

/// The declarative document handed to the runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
}

impl Configuration {
    /// Parse a serialized configuration document
    pub fn from_document(document: &str) -> Result<Self> {
        serde_json::from_str(document).map_err(|e| {
            HarnessError::config_invalid(format!("malformed configuration document: {}", e))
        })
    }

    /// Serialize into the document format understood by the runtime
    pub fn to_document(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn component(&self, name: &str) -> Option<&ComponentSpec> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn module(&self, name: &str) -> Option<&ModuleSpec> {
        self.modules.iter().find(|m| m.name() == name)
    }
}
