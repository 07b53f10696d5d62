//! Dependency declarations and their policies.
//!
//! A catalog app declares its dependencies as keyed slots. Each slot
//! carries an ordered list of alternatives that can satisfy it and the
//! policies governing creation, updates and deletion along that edge.

use serde::{Deserialize, Serialize};

use crate::config::Properties;
use crate::error::ModelError;
use crate::instance::{AppId, InstanceId};

/// Whether resolving this slot may create a fresh instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreatePolicy {
  /// Create a dedicated child even when instances of the app exist,
  /// unless an unreferenced one can be claimed.
  Always,
  /// Create only when no instance of any alternative exists.
  IfNotExisting,
  /// Never create; an existing instance is required.
  Never,
}

/// Whether the parent may rewrite the child's properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdatePolicy {
  Always,
  Never,
  /// Only when the parent is the sole live referrer of the child.
  IfMine,
}

/// Whether deleting the parent cascades into the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletePolicy {
  Always,
  Never,
  /// Only when the parent is the sole remaining referrer of the child.
  IfMine,
}

/// What the child itself may modify while this parent declares properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyUpdatePolicy {
  AllowAll,
  AllowNone,
  AllowOnlyUnconfiguredProperties,
}

/// Whether the child may be deleted while this parent exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyDeletePolicy {
  Allowed,
  NotAllowed,
}

/// One alternative for satisfying a declaration: either any instance of
/// an app, or one specific instance. Carries the overrides the parent
/// imposes and the properties used when a fresh instance is created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppDependencyConfig {
  #[serde(rename = "appId")]
  pub app_id: Option<AppId>,
  #[serde(rename = "specificInstanceId")]
  pub specific_instance_id: Option<InstanceId>,
  pub alias: Option<String>,
  pub properties: Properties,
  #[serde(rename = "initialProperties")]
  pub initial_properties: Properties,
}

impl AppDependencyConfig {
  pub fn for_app(app_id: AppId) -> Self {
    Self { app_id: Some(app_id), ..Default::default() }
  }

  pub fn for_instance(instance_id: InstanceId) -> Self {
    Self { specific_instance_id: Some(instance_id), ..Default::default() }
  }

  /// Render-time property view: declared properties layered over the
  /// creation defaults.
  pub fn effective_properties(&self) -> Properties {
    let mut merged = self.initial_properties.clone();
    merged.extend(self.properties.clone());
    merged
  }

  /// Whether this alternative can be satisfied by the given instance.
  pub fn matches(&self, app_id: &AppId, instance_id: &InstanceId) -> bool {
    self.app_id.as_ref() == Some(app_id) || self.specific_instance_id.as_ref() == Some(instance_id)
  }
}

/// A dependency slot of a catalog app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyDeclaration {
  pub key: String,
  #[serde(rename = "appConfigs")]
  pub app_configs: Vec<AppDependencyConfig>,
  #[serde(rename = "createPolicy")]
  pub create_policy: CreatePolicy,
  #[serde(rename = "updatePolicy")]
  pub update_policy: UpdatePolicy,
  #[serde(rename = "deletePolicy")]
  pub delete_policy: DeletePolicy,
  #[serde(rename = "dependencyUpdatePolicy")]
  pub dependency_update_policy: DependencyUpdatePolicy,
  #[serde(rename = "dependencyDeletePolicy")]
  pub dependency_delete_policy: DependencyDeletePolicy,
}

impl DependencyDeclaration {
  pub fn new(key: impl Into<String>, app_configs: Vec<AppDependencyConfig>) -> Self {
    Self {
      key: key.into(),
      app_configs,
      create_policy: CreatePolicy::IfNotExisting,
      update_policy: UpdatePolicy::Always,
      delete_policy: DeletePolicy::IfMine,
      dependency_update_policy: DependencyUpdatePolicy::AllowAll,
      dependency_delete_policy: DependencyDeletePolicy::Allowed,
    }
  }

  /// The alternative that matches an installed instance, if any.
  pub fn alternative_for(&self, app_id: &AppId, instance_id: &InstanceId) -> Option<&AppDependencyConfig> {
    self.app_configs.iter().find(|c| c.matches(app_id, instance_id))
  }

  /// Checks structural invariants of the declaration.
  pub fn validate(&self) -> Result<(), ModelError> {
    if self.app_configs.is_empty() {
      return Err(ModelError::NoAlternatives { key: self.key.clone() });
    }
    for config in &self.app_configs {
      match (&config.app_id, &config.specific_instance_id) {
        (None, None) => return Err(ModelError::EmptyAlternative { key: self.key.clone() }),
        (Some(_), Some(_)) => return Err(ModelError::AmbiguousAlternative { key: self.key.clone() }),
        _ => {}
      }
    }
    Ok(())
  }
}
