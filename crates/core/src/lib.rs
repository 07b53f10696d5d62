//! edgeapps-core: Data model for the edge application manager.
//!
//! This crate provides the fundamental types shared by the planner:
//! - `App`: an immutable catalog entry that renders configurations
//! - `AppInstance`: a concrete installation with identity and properties
//! - `DependencyDeclaration`: a typed dependency slot with its policies
//! - `AppConfiguration`: the rendered contribution of one instance
//!
//! The types are engine-agnostic. The `edgeapps` crate layers graph
//! traversal, dependency resolution, and transaction planning on top.

pub mod app;
pub mod config;
pub mod declaration;
pub mod error;
pub mod instance;
pub mod user;

pub use app::{App, PropertyDescriptor, ValidatorConfig};
pub use config::{AppConfiguration, ComponentConfig, ConfigurationTarget, InterfaceConfiguration, Properties};
pub use declaration::{
  AppDependencyConfig, CreatePolicy, DeletePolicy, DependencyDeclaration, DependencyDeletePolicy,
  DependencyUpdatePolicy, UpdatePolicy,
};
pub use error::{ModelError, RenderError};
pub use instance::{AppId, AppInstance, Dependency, InstanceId};
pub use user::{Language, User};
