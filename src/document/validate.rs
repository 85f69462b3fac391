use super::model::{ComponentSpec, Configuration, ModuleSpec};
use crate::error::{HarnessError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

impl Configuration {
    /// Check the structural invariants of the document. Performs no I/O.
    pub fn validate(&self) -> Result<()> {
        self.binding_order().map(|_| ())
    }

    /// Components ordered so that every component follows its dependencies.
    ///
    /// Fails with `ConfigInvalid` on empty or duplicate names, malformed
    /// api/model triplets, unknown or repeated dependencies, and cycles.
    pub fn binding_order(&self) -> Result<Vec<&ComponentSpec>> {
        let mut module_names = HashSet::new();
        for module in &self.modules {
            if module.name().trim().is_empty() {
                return Err(HarnessError::config_invalid("module name must not be empty"));
            }
            if !module_names.insert(module.name()) {
                return Err(HarnessError::config_invalid(format!(
                    "duplicate module name '{}'",
                    module.name()
                )));
            }
            match module {
                ModuleSpec::Local {
                    executable_path, ..
                } if executable_path.as_os_str().is_empty() => {
                    return Err(HarnessError::config_invalid(format!(
                        "module '{}' has an empty executable_path",
                        module.name()
                    )));
                }
                ModuleSpec::Registry { module_id, .. } if module_id.trim().is_empty() => {
                    return Err(HarnessError::config_invalid(format!(
                        "module '{}' has an empty module_id",
                        module.name()
                    )));
                }
                _ => {}
            }
        }

        let mut index = HashMap::new();
        for (position, component) in self.components.iter().enumerate() {
            if component.name.trim().is_empty() {
                return Err(HarnessError::config_invalid("component name must not be empty"));
            }
            if index.insert(component.name.as_str(), position).is_some() {
                return Err(HarnessError::config_invalid(format!(
                    "duplicate component name '{}'",
                    component.name
                )));
            }
            if !is_triplet(&component.api) {
                return Err(HarnessError::config_invalid(format!(
                    "component '{}' has malformed api '{}'",
                    component.name, component.api
                )));
            }
            if !is_triplet(&component.model) {
                return Err(HarnessError::config_invalid(format!(
                    "component '{}' has malformed model '{}'",
                    component.name, component.model
                )));
            }
        }

        // Kahn's algorithm; ties keep document order
        let mut in_degree = vec![0usize; self.components.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.components.len()];
        for (position, component) in self.components.iter().enumerate() {
            let mut seen = HashSet::new();
            for dependency in &component.depends_on {
                if !seen.insert(dependency.as_str()) {
                    return Err(HarnessError::config_invalid(format!(
                        "component '{}' lists dependency '{}' more than once",
                        component.name, dependency
                    )));
                }
                let Some(&target) = index.get(dependency.as_str()) else {
                    return Err(HarnessError::config_invalid(format!(
                        "component '{}' depends on unknown component '{}'",
                        component.name, dependency
                    )));
                };
                if target == position {
                    return Err(HarnessError::config_invalid(format!(
                        "component '{}' depends on itself",
                        component.name
                    )));
                }
                in_degree[position] += 1;
                dependents[target].push(position);
            }
        }

        let mut ready: VecDeque<usize> = (0..self.components.len())
            .filter(|&position| in_degree[position] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.components.len());
        while let Some(position) = ready.pop_front() {
            order.push(&self.components[position]);
            for &dependent in &dependents[position] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }

        if order.len() != self.components.len() {
            let cyclic: Vec<&str> = self
                .components
                .iter()
                .enumerate()
                .filter(|(position, _)| in_degree[*position] > 0)
                .map(|(_, component)| component.name.as_str())
                .collect();
            return Err(HarnessError::config_invalid(format!(
                "dependency cycle between components: {}",
                cyclic.join(", ")
            )));
        }

        Ok(order)
    }

    /// Every local module must point at a file this process can execute
    pub fn check_executables(&self) -> Result<()> {
        for module in &self.modules {
            if let Some(path) = module.executable_path() {
                if !path.is_file() {
                    return Err(HarnessError::config_invalid(format!(
                        "module '{}' executable {} does not exist",
                        module.name(),
                        path.display()
                    )));
                }
                if !is_executable(path) {
                    return Err(HarnessError::config_invalid(format!(
                        "module '{}' executable {} is not executable by this process",
                        module.name(),
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn is_triplet(value: &str) -> bool {
    let parts: Vec<&str> = value.split(':').collect();
    parts.len() == 3 && parts.iter().all(|part| !part.trim().is_empty())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
    unsafe { libc::access(c_path.as_ptr(), libc::X_OK) == 0 }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
