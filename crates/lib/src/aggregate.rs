//! Downstream configuration sinks.
//!
//! Every visited instance pushes its `(new, old)` configuration pair to
//! three aggregators, which batch the deltas for their subsystem and
//! realize them when the transaction commits. Commit order is fixed:
//! components first (the scheduler references components that must
//! exist), then the scheduler, then static addresses.

use edgeapps_core::{AppConfiguration, User};
use thiserror::Error;

/// A batch realization failed; the message is already user-facing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct AggregateError {
  pub message: String,
}

impl AggregateError {
  pub fn new(message: impl Into<String>) -> Self {
    Self { message: message.into() }
  }
}

/// A sink batching configuration deltas for one subsystem.
///
/// `aggregate` receives the new and old configuration of one instance;
/// `None` means the instance is being created (no old) or deleted (no
/// new). `commit` realizes the accumulated batch and must be
/// transactional per aggregator: either all of its changes land or none.
pub trait Aggregator {
  /// Clears any pending batch. Called at request entry and after a
  /// failed request, before any retry.
  fn reset(&mut self);

  /// Accumulates the delta contribution of one instance.
  fn aggregate(&mut self, new_config: Option<&AppConfiguration>, old_config: Option<&AppConfiguration>);

  /// Realizes the batch. `other_configs` are the configurations of all
  /// instances untouched by this request, for conflict detection.
  fn commit(&mut self, user: Option<&User>, other_configs: &[AppConfiguration]) -> Result<(), AggregateError>;
}

/// The three sinks in their fixed commit order, each paired with the
/// message key reported when its commit fails.
pub struct AggregatorSet {
  pub components: Box<dyn Aggregator>,
  pub scheduler: Box<dyn Aggregator>,
  pub static_ips: Box<dyn Aggregator>,
}

impl AggregatorSet {
  pub fn new(
    components: Box<dyn Aggregator>,
    scheduler: Box<dyn Aggregator>,
    static_ips: Box<dyn Aggregator>,
  ) -> Self {
    Self { components, scheduler, static_ips }
  }

  pub fn reset(&mut self) {
    for (aggregator, _) in self.iter_mut() {
      aggregator.reset();
    }
  }

  pub fn aggregate(&mut self, new_config: Option<&AppConfiguration>, old_config: Option<&AppConfiguration>) {
    for (aggregator, _) in self.iter_mut() {
      aggregator.aggregate(new_config, old_config);
    }
  }

  /// Commit order with per-stage failure message keys.
  pub fn iter_mut(&mut self) -> [(&mut dyn Aggregator, &'static str); 3] {
    [
      (self.components.as_mut(), "canNotUpdateComponents"),
      (self.scheduler.as_mut(), "canNotUpdateScheduler"),
      (self.static_ips.as_mut(), "canNotUpdateStaticIps"),
    ]
  }
}
