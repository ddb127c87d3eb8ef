//! Feature modules: bundles of queries and view definitions installed into a
//! navigator, with requirements loaded first.

use std::{collections::HashMap, sync::Arc};

use shared::error::NavError;
use tracing::{info, warn};

use crate::navigator::Navigator;

pub trait FeatureModule: Send + Sync {
    fn name(&self) -> &str;

    /// The application this module belongs to.
    fn app_name(&self) -> &str;

    fn requirements(&self) -> Vec<String> {
        Vec::new()
    }

    /// Registers the module's queries and view definitions.
    fn install(&self, nav: &Navigator) -> Result<(), NavError>;
}

#[derive(Default)]
pub struct ModuleLoader {
    available: HashMap<String, Arc<dyn FeatureModule>>,
    loaded: Vec<String>,
    loading: Vec<String>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, module: Arc<dyn FeatureModule>) -> &mut Self {
        self.available.insert(module.name().to_string(), module);
        self
    }

    /// Modules installed so far, in installation order.
    pub fn loaded(&self) -> &[String] {
        &self.loaded
    }

    /// Installs `name` and, before it, any requirement not yet installed.
    ///
    /// Returns the modules newly installed by this call (empty when `name` was
    /// already loaded), or `None` when `name` belongs to a different app than
    /// `app_name`. Without an `app_name` the module's own app is adopted for
    /// its requirements.
    pub fn load(
        &mut self,
        app_name: Option<&str>,
        name: &str,
        nav: &Navigator,
    ) -> Result<Option<Vec<String>>, NavError> {
        if self.loaded.iter().any(|loaded| loaded == name) {
            return Ok(Some(Vec::new()));
        }
        let module = self
            .available
            .get(name)
            .cloned()
            .ok_or_else(|| NavError::UnknownModule(name.to_string()))?;

        if let Some(app_name) = app_name {
            if app_name != module.app_name() {
                warn!(
                    module = name,
                    module_app = module.app_name(),
                    app = app_name,
                    "skipping module that belongs to another app"
                );
                return Ok(None);
            }
        }
        let app_name = module.app_name().to_string();

        self.loading.push(name.to_string());
        let result = self.load_requirements(&app_name, module.as_ref(), nav);
        self.loading.pop();
        let mut newly_loaded = result?;

        module.install(nav)?;
        self.loaded.push(name.to_string());
        newly_loaded.push(name.to_string());
        info!(module = name, "module loaded");
        Ok(Some(newly_loaded))
    }

    fn load_requirements(
        &mut self,
        app_name: &str,
        module: &dyn FeatureModule,
        nav: &Navigator,
    ) -> Result<Vec<String>, NavError> {
        let mut newly_loaded = Vec::new();
        for requirement in module.requirements() {
            if self.loaded.contains(&requirement) {
                continue;
            }
            let dependency_error = || NavError::ModuleDependency {
                module: module.name().to_string(),
                requirement: requirement.clone(),
            };
            if self.loading.contains(&requirement) {
                return Err(dependency_error());
            }
            match self.load(Some(app_name), &requirement, nav) {
                Ok(Some(loaded)) if !loaded.is_empty() => newly_loaded.extend(loaded),
                Ok(_) | Err(NavError::UnknownModule(_)) => return Err(dependency_error()),
                Err(err) => return Err(err),
            }
        }
        Ok(newly_loaded)
    }
}

#[cfg(test)]
#[path = "tests/modules_tests.rs"]
mod tests;
