//! User modules and the string-keyed module registry.
//!
//! A module is the unit a configuration file instantiates: the config's
//! `"type"` key selects a constructor registered at program start, and the
//! resulting module wires its publishers, subscribers, and scheduler tasks
//! in [`Module::run`]. The node and scheduler know nothing about modules;
//! this layer only hands them to user code.

use std::collections::HashMap;

use crate::config::Config;
use crate::net::node::Node;
use crate::scheduler::Scheduler;
use crate::{Error, Result};

/// Capabilities handed to a module when it runs. Both members are cheap
/// clones sharing state with the application's node and scheduler.
pub struct ModuleContext {
    pub node: Node,
    pub scheduler: Scheduler,
}

pub trait Module: Send {
    fn name(&self) -> &str;

    /// Register publishers, subscribers, and scheduler tasks. Called once,
    /// before the application parks in the scheduler's run loop.
    fn run(&mut self, ctx: &mut ModuleContext) -> Result<()>;
}

type Constructor = Box<dyn Fn(&Config) -> Result<Box<dyn Module>> + Send + Sync>;

/// Explicit type-name to constructor registry, populated at program start.
#[derive(Default)]
pub struct ModuleRegistry {
    constructors: HashMap<String, Constructor>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `constructor` under `type_name`. Re-registering a name
    /// replaces the previous constructor.
    pub fn register<F>(&mut self, type_name: impl Into<String>, constructor: F)
    where
        F: Fn(&Config) -> Result<Box<dyn Module>> + Send + Sync + 'static,
    {
        self.constructors.insert(type_name.into(), Box::new(constructor));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// Build the module selected by the config's `"type"` key.
    pub fn create(&self, config: &Config) -> Result<Box<dyn Module>> {
        let type_name = config.require_str("type")?;
        match self.constructors.get(type_name) {
            Some(constructor) => constructor(config),
            None => Err(Error::UnknownModuleType(type_name.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        label: String,
    }

    impl Module for Probe {
        fn name(&self) -> &str {
            &self.label
        }

        fn run(&mut self, _ctx: &mut ModuleContext) -> Result<()> {
            Ok(())
        }
    }

    fn registry_with_probe() -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry.register("probe", |config| {
            Ok(Box::new(Probe {
                label: config.get_str("label").unwrap_or("probe").to_owned(),
            }) as Box<dyn Module>)
        });
        registry
    }

    #[test]
    fn create_selects_by_type_key() {
        let registry = registry_with_probe();
        let config = Config::from_json_str(r#"{"type":"probe","label":"p1"}"#).unwrap();
        let module = registry.create(&config).unwrap();
        assert_eq!(module.name(), "p1");
    }

    #[test]
    fn unknown_type_is_an_error() {
        let registry = registry_with_probe();
        let config = Config::from_json_str(r#"{"type":"nope"}"#).unwrap();
        assert!(matches!(registry.create(&config), Err(Error::UnknownModuleType(_))));
    }

    #[test]
    fn missing_type_key_is_an_error() {
        let registry = registry_with_probe();
        let config = Config::from_json_str("{}").unwrap();
        assert!(matches!(registry.create(&config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn re_registering_replaces_the_constructor() {
        let mut registry = registry_with_probe();
        registry.register("probe", |_config| {
            Ok(Box::new(Probe {
                label: "replaced".to_owned(),
            }) as Box<dyn Module>)
        });
        let config = Config::from_json_str(r#"{"type":"probe"}"#).unwrap();
        assert_eq!(registry.create(&config).unwrap().name(), "replaced");
    }
}
