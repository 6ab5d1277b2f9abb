//! String-keyed driver factories. The coordinator's configuration names a
//! driver by identifier; implementations register a factory closure here at
//! startup instead of being resolved by class name at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DriverConfiguration;
use crate::error::DriverError;
use crate::sink::MetricsSink;
use crate::{Driver, loopback};

/// Builds a driver from its configuration document and a metrics sink.
pub type DriverFactory =
    Box<dyn Fn(&DriverConfiguration, Arc<dyn MetricsSink>) -> Result<Arc<dyn Driver>, DriverError> + Send + Sync>;

pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with every driver shipped in this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(loopback::DRIVER_NAME, Box::new(loopback::factory));
        registry
    }

    /// Registers `factory` under `name`, replacing any previous registration.
    pub fn register(&mut self, name: &str, factory: DriverFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    /// Instantiates the driver named by `config.driver_class`.
    pub fn create(
        &self,
        config: &DriverConfiguration,
        sink: Arc<dyn MetricsSink>,
    ) -> Result<Arc<dyn Driver>, DriverError> {
        let factory = self
            .factories
            .get(&config.driver_class)
            .ok_or_else(|| DriverError::UnknownDriver(config.driver_class.clone()))?;

        factory(config, sink)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
