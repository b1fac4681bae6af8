//! Exporter and generator registry
//!
//! Maps a configured name to a factory. Built-ins are registered first;
//! registering an existing name replaces it.

use std::collections::BTreeMap;

use crate::codegen::{Generator, TemplateGenerator};
use crate::config::SpacemkConfig;
use crate::error::{MigrationError, Result};
use crate::source::{Exporter, TerraformExporter};

/// Builds an exporter from the configuration
pub type ExporterFactory = Box<dyn Fn(&SpacemkConfig) -> Result<Box<dyn Exporter>> + Send + Sync>;

/// Builds a generator from the configuration
pub type GeneratorFactory = Box<dyn Fn(&SpacemkConfig) -> Result<Box<dyn Generator>> + Send + Sync>;

/// Name to factory table
pub struct Registry<F> {
    kind: &'static str,
    factories: BTreeMap<String, F>,
}

impl<F> Registry<F> {
    /// Empty registry; `kind` names the entries in errors
    pub fn empty(kind: &'static str) -> Self {
        Self {
            kind,
            factories: BTreeMap::new(),
        }
    }

    /// Register a factory, replacing any existing one with the same name
    pub fn register(&mut self, name: impl Into<String>, factory: F) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Result<&F> {
        self.factories.get(name).ok_or_else(|| {
            MigrationError::Config(format!(
                "unknown {} '{name}' (available: {})",
                self.kind,
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })
    }
}

impl Registry<ExporterFactory> {
    /// Registry holding the built-in exporters
    pub fn exporters() -> Self {
        let mut registry = Self::empty("exporter");
        registry.register(
            "terraform",
            Box::new(|config: &SpacemkConfig| -> Result<Box<dyn Exporter>> {
                Ok(Box::new(TerraformExporter::new(config)?))
            }),
        );
        registry
    }

    pub fn create(&self, config: &SpacemkConfig) -> Result<Box<dyn Exporter>> {
        (self.get(&config.exporter.name)?)(config)
    }
}

impl Registry<GeneratorFactory> {
    /// Registry holding the built-in generators
    pub fn generators() -> Self {
        let mut registry = Self::empty("generator");
        registry.register(
            "terraform",
            Box::new(|config: &SpacemkConfig| -> Result<Box<dyn Generator>> {
                Ok(Box::new(TemplateGenerator::new(config.generator.clone())))
            }),
        );
        registry
    }

    pub fn create(&self, config: &SpacemkConfig) -> Result<Box<dyn Generator>> {
        (self.get(&config.generator.name)?)(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntityGraph;
    use std::path::PathBuf;

    struct Fixed(&'static str);

    impl Generator for Fixed {
        fn generate(&self, _graph: &EntityGraph) -> Result<Vec<PathBuf>> {
            Ok(vec![PathBuf::from(self.0)])
        }
    }

    #[test]
    fn test_builtins_are_registered() {
        assert_eq!(Registry::exporters().names().collect::<Vec<_>>(), vec!["terraform"]);
        assert_eq!(Registry::generators().names().collect::<Vec<_>>(), vec!["terraform"]);
    }

    #[test]
    fn test_unknown_name_is_a_config_error() {
        let mut config = SpacemkConfig::default();
        config.generator.name = "pulumi".to_string();
        let err = Registry::generators().create(&config).err().unwrap();
        assert!(matches!(&err, MigrationError::Config(message) if message.contains("pulumi")));
    }

    #[test]
    fn test_later_registration_replaces_builtin() {
        let mut registry = Registry::generators();
        registry.register(
            "terraform",
            Box::new(|_: &SpacemkConfig| -> Result<Box<dyn Generator>> { Ok(Box::new(Fixed("custom.tf"))) }),
        );
        let generator = registry.create(&SpacemkConfig::default()).unwrap();
        assert_eq!(generator.generate(&EntityGraph::new()).unwrap(), vec![PathBuf::from("custom.tf")]);
    }

    #[test]
    fn test_exporter_requires_api_token() {
        let config = SpacemkConfig::default();
        assert!(Registry::exporters().create(&config).is_err());
    }
}
