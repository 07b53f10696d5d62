//! edgeapps: Dependency resolution and transaction planning for the
//! edge application manager.
//!
//! Installed apps form a graph: each instance may depend on other
//! instances through typed, policy-carrying declarations, and each
//! contributes component, scheduler and network configuration to the
//! appliance. This crate turns install/update/delete requests against
//! that graph into atomic plans:
//!
//! - [`policy`]: pure predicates over the declaration policies
//! - [`walk`]: cycle-safe post-order traversal of desired and installed
//!   graphs
//! - [`resolve`]: reuse-vs-create decisions per dependency
//! - [`reconcile`]: stable, collision-free component id assignment
//! - [`transaction`]: the per-request scratch and its guarantees
//! - [`planner`]: the orchestrating [`planner::AppPlanner`]
//! - [`aggregate`]: batching sinks for the downstream subsystems
//!
//! The surrounding management service provides the catalog, instance
//! store, validator, component registry and aggregators; see [`store`],
//! [`validator`], [`component`] and [`aggregate`] for the contracts.

pub mod aggregate;
pub mod component;
pub mod planner;
pub mod policy;
pub mod reconcile;
pub mod resolve;
pub mod store;
pub mod transaction;
pub mod translate;
pub mod validator;
pub mod walk;

pub use aggregate::{AggregateError, Aggregator, AggregatorSet};
pub use component::ComponentRegistry;
pub use planner::{AppPlanner, PlanError, UpdateValues};
pub use store::AppStore;
pub use transaction::{Transaction, TransactionError};
pub use translate::{DefaultTranslator, Translator};
pub use validator::{Validator, ValidatorStatus};
pub use walk::{DesiredNode, DesiredVisitor, EdgeInclusion, ExistingNode, ExistingVisitor, WalkError};
