//! Error types for the data model.

use thiserror::Error;

/// An app failed to render a configuration.
///
/// Carries an opaque message from the catalog app; the planner decides
/// per context whether this becomes a warning or a request failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RenderError {
  pub message: String,
}

impl RenderError {
  pub fn new(message: impl Into<String>) -> Self {
    Self { message: message.into() }
  }
}

/// A model value violates one of its structural invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
  /// Two dependencies of one instance share a key.
  #[error("duplicate dependency key '{key}'")]
  DuplicateDependencyKey { key: String },

  /// A dependency alternative names neither an app nor an instance.
  #[error("dependency alternative for '{key}' targets neither an app nor an instance")]
  EmptyAlternative { key: String },

  /// A dependency alternative names both an app and a specific instance.
  #[error("dependency alternative for '{key}' targets both an app and an instance")]
  AmbiguousAlternative { key: String },

  /// A declaration has no alternatives at all.
  #[error("dependency declaration '{key}' has no alternatives")]
  NoAlternatives { key: String },
}
