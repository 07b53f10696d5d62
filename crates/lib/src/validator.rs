//! The compatibility/installability checker contract.

use edgeapps_core::{Language, ValidatorConfig};

/// Outcome of validating an app against the current appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorStatus {
  /// Hardware or firmware requirements are not met.
  Incompatible,
  /// Compatible, but an installability check fails.
  Compatible,
  /// All checks pass; the app can be installed.
  Installable,
}

/// Pluggable checker consulted before an install.
pub trait Validator {
  fn status(&self, config: &ValidatorConfig) -> ValidatorStatus;

  /// Messages of failing compatibility checks.
  fn compatible_messages(&self, config: &ValidatorConfig, language: Language) -> Vec<String>;

  /// Messages of failing installability checks.
  fn installable_messages(&self, config: &ValidatorConfig, language: Language) -> Vec<String>;
}

/// Checker that accepts everything; useful for appliances without
/// hardware constraints and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Validator for AcceptAll {
  fn status(&self, _config: &ValidatorConfig) -> ValidatorStatus {
    ValidatorStatus::Installable
  }

  fn compatible_messages(&self, _config: &ValidatorConfig, _language: Language) -> Vec<String> {
    Vec::new()
  }

  fn installable_messages(&self, _config: &ValidatorConfig, _language: Language) -> Vec<String> {
    Vec::new()
  }
}
