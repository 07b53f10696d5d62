//! The catalog app contract.

use serde::{Deserialize, Serialize};

use crate::config::{AppConfiguration, ConfigurationTarget, Properties};
use crate::error::RenderError;
use crate::instance::AppId;
use crate::user::Language;

/// Describes one instance property of an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
  pub name: String,
  /// Whether the value may be written to the instance store. Secrets
  /// (passwords, API keys) set this to false and are stripped before an
  /// instance is recorded.
  #[serde(rename = "isPersistable")]
  pub is_persistable: bool,
}

impl PropertyDescriptor {
  pub fn persistable(name: impl Into<String>) -> Self {
    Self { name: name.into(), is_persistable: true }
  }

  pub fn transient(name: impl Into<String>) -> Self {
    Self { name: name.into(), is_persistable: false }
  }
}

/// Input to the compatibility/installability checker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorConfig {
  #[serde(rename = "compatibleCheckNames")]
  pub compatible_check_names: Vec<String>,
  #[serde(rename = "installableCheckNames")]
  pub installable_check_names: Vec<String>,
}

/// An immutable catalog entry.
///
/// Rendering must be pure: the same target, alias, properties and
/// language always produce the same configuration.
///
/// For [`ConfigurationTarget::Test`] renders, a component whose id is
/// sourced from an instance property `KEY` with default `DEF` must
/// render its id as `"<value>:DEF"` when the property is set and
/// `"KEY:DEF"` when unset. Fixed-id components render their real id.
/// The id reconciliation probe depends on this shape.
pub trait App {
  fn app_id(&self) -> &AppId;

  /// Localized display name; also the default alias for fresh instances.
  fn name(&self, language: Language) -> String;

  fn render(
    &self,
    target: ConfigurationTarget,
    alias: Option<&str>,
    properties: &Properties,
    language: Language,
  ) -> Result<AppConfiguration, RenderError>;

  fn properties(&self) -> Vec<PropertyDescriptor>;

  fn validator_config(&self) -> ValidatorConfig;
}
