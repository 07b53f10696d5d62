//! Rendered app configurations.
//!
//! An [`AppConfiguration`] is the contribution one instance makes to the
//! shared edge configuration: component definitions, a scheduler
//! execution order, network interface entries, and the dependency
//! declarations to resolve below it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::declaration::DependencyDeclaration;

/// Ordered property map used for instances and components.
pub type Properties = BTreeMap<String, Value>;

/// What a render is for; the catalog may render differently per target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigurationTarget {
  Add,
  Update,
  Delete,
  Test,
}

/// One component definition produced by a render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentConfig {
  pub id: String,
  pub alias: String,
  #[serde(rename = "factoryId")]
  pub factory_id: String,
  pub properties: Properties,
}

impl ComponentConfig {
  pub fn new(id: impl Into<String>, alias: impl Into<String>, factory_id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      alias: alias.into(),
      factory_id: factory_id.into(),
      properties: Properties::new(),
    }
  }

  /// Same factory and properties; id and alias may differ.
  pub fn same_settings(&self, other: &Self) -> bool {
    self.factory_id == other.factory_id && self.properties == other.properties
  }
}

/// Static IP entries for one network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfiguration {
  pub interface: String,
  pub addresses: Vec<String>,
}

/// Full render output of one app instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfiguration {
  pub components: Vec<ComponentConfig>,
  #[serde(rename = "schedulerExecutionOrder")]
  pub scheduler_execution_order: Vec<String>,
  pub ips: Vec<InterfaceConfiguration>,
  pub dependencies: Vec<DependencyDeclaration>,
}

impl AppConfiguration {
  /// The component with the given id, if rendered.
  pub fn component(&self, id: &str) -> Option<&ComponentConfig> {
    self.components.iter().find(|c| c.id == id)
  }
}
