//! Installed app instances and their dependency edges.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Properties;
use crate::error::ModelError;

/// Stable identifier of a catalog app (e.g. `"App.Meter.Socomec"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppId(pub String);

impl AppId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }
}

impl fmt::Display for AppId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Identity of an installed instance, stable across updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
  pub fn random() -> Self {
    Self(Uuid::new_v4())
  }
}

impl fmt::Display for InstanceId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}

/// A dependency edge: the declaration key it satisfies and the target
/// instance. Serialized as `{key, instanceId}` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
  pub key: String,
  #[serde(rename = "instanceId")]
  pub instance_id: InstanceId,
}

impl Dependency {
  pub fn new(key: impl Into<String>, instance_id: InstanceId) -> Self {
    Self { key: key.into(), instance_id }
  }
}

/// One installation of a catalog app.
///
/// Instances are value types: edits produce replacements under the same
/// `instance_id`. Equality and hashing go by `instance_id` alone, so set
/// membership follows identity; use [`AppInstance::same_content`] to
/// compare full contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInstance {
  #[serde(rename = "appId")]
  pub app_id: AppId,
  pub alias: String,
  #[serde(rename = "instanceId")]
  pub instance_id: InstanceId,
  pub properties: Properties,
  pub dependencies: Vec<Dependency>,
}

impl PartialEq for AppInstance {
  fn eq(&self, other: &Self) -> bool {
    self.instance_id == other.instance_id
  }
}

impl Eq for AppInstance {}

impl std::hash::Hash for AppInstance {
  fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
    self.instance_id.hash(state);
  }
}

impl AppInstance {
  pub fn new(app_id: AppId, alias: impl Into<String>, properties: Properties) -> Self {
    Self {
      app_id,
      alias: alias.into(),
      instance_id: InstanceId::random(),
      properties,
      dependencies: Vec::new(),
    }
  }

  /// Whether this instance holds an edge to `id`.
  pub fn references(&self, id: &InstanceId) -> bool {
    self.dependencies.iter().any(|d| d.instance_id == *id)
  }

  /// The stored edge satisfying declaration `key`, if any.
  pub fn dependency(&self, key: &str) -> Option<&Dependency> {
    self.dependencies.iter().find(|d| d.key == key)
  }

  /// Field-by-field comparison, unlike `==` which compares identity only.
  pub fn same_content(&self, other: &Self) -> bool {
    self.instance_id == other.instance_id
      && self.app_id == other.app_id
      && self.alias == other.alias
      && self.properties == other.properties
      && self.dependencies == other.dependencies
  }

  /// Checks structural invariants: dependency keys must be unique.
  pub fn validate(&self) -> Result<(), ModelError> {
    let mut seen = HashSet::new();
    for dependency in &self.dependencies {
      if !seen.insert(dependency.key.as_str()) {
        return Err(ModelError::DuplicateDependencyKey {
          key: dependency.key.clone(),
        });
      }
    }
    Ok(())
  }
}
