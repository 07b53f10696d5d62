//! Per-request transaction scratch.
//!
//! A request never mutates live instances in place. It stages immutable
//! replacements in three sets keyed by instance identity; rollback is
//! dropping the scratch. The overlay of scratch over the live snapshot
//! is what every lookup during the request sees.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use thiserror::Error;

use edgeapps_core::{AppInstance, InstanceId};

/// A staged plan violates one of its structural guarantees.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
  /// An instance is staged in more than one set.
  #[error("instance {0} is staged in more than one set")]
  Overlap(InstanceId),

  /// A surviving instance references an instance that will not survive.
  #[error("instance {from} references missing instance {to}")]
  DanglingReference { from: InstanceId, to: InstanceId },

  /// The planned graph contains a dependency cycle.
  #[error("dependency cycle in planned instance graph")]
  Cycle,
}

/// The three disjoint staging sets of one request.
///
/// `stage_creating`/`stage_modifying` replace by instance id, so
/// re-staging an instance updates it in place within its set.
#[derive(Debug, Default, Clone)]
pub struct Transaction {
  creating: Vec<AppInstance>,
  modifying: Vec<AppInstance>,
  deleting: Vec<AppInstance>,
}

impl Transaction {
  pub fn creating(&self) -> &[AppInstance] {
    &self.creating
  }

  pub fn modifying(&self) -> &[AppInstance] {
    &self.modifying
  }

  pub fn deleting(&self) -> &[AppInstance] {
    &self.deleting
  }

  /// Instances created or modified by this request, creations first.
  pub fn created_or_modified(&self) -> Vec<AppInstance> {
    let mut all = self.creating.clone();
    all.extend(self.modifying.clone());
    all
  }

  pub fn is_creating(&self, id: &InstanceId) -> bool {
    self.creating.iter().any(|i| i.instance_id == *id)
  }

  pub fn is_deleting(&self, id: &InstanceId) -> bool {
    self.deleting.iter().any(|i| i.instance_id == *id)
  }

  /// Stages a creation, replacing any previous staging of the same id.
  pub fn stage_creating(&mut self, instance: AppInstance) {
    self.remove(&instance.instance_id);
    self.creating.push(instance);
  }

  /// Stages a modification, replacing any previous staging of the same id.
  pub fn stage_modifying(&mut self, instance: AppInstance) {
    self.remove(&instance.instance_id);
    self.modifying.push(instance);
  }

  /// Re-stages an instance wherever it currently lives: a tentative
  /// creation stays a creation, everything else becomes a modification.
  pub fn restage(&mut self, instance: AppInstance) {
    if self.is_creating(&instance.instance_id) {
      self.stage_creating(instance);
    } else {
      self.stage_modifying(instance);
    }
  }

  /// Stages a deletion, removing the id from the other sets.
  pub fn stage_deleting(&mut self, instance: AppInstance) {
    self.remove(&instance.instance_id);
    self.deleting.push(instance);
  }

  fn remove(&mut self, id: &InstanceId) {
    self.creating.retain(|i| i.instance_id != *id);
    self.modifying.retain(|i| i.instance_id != *id);
    self.deleting.retain(|i| i.instance_id != *id);
  }

  /// The request's view of the instance graph: live instances minus
  /// deletions, with modifications replacing their originals, plus
  /// creations.
  pub fn overlay(&self, live: &[AppInstance]) -> Vec<AppInstance> {
    let mut all: Vec<AppInstance> = live
      .iter()
      .filter(|i| !self.is_deleting(&i.instance_id))
      .filter(|i| !self.modifying.iter().any(|m| m.instance_id == i.instance_id))
      .cloned()
      .collect();
    all.extend(self.modifying.clone());
    all.extend(self.creating.clone());
    all
  }

  /// A staged instance (created or modified) by id.
  pub fn staged(&self, id: &InstanceId) -> Option<&AppInstance> {
    self
      .creating
      .iter()
      .chain(self.modifying.iter())
      .find(|i| i.instance_id == *id)
  }

  /// Verifies the plan against the live snapshot: set disjointness,
  /// referential closure of the surviving graph, and acyclicity.
  pub fn validate(&self, live: &[AppInstance]) -> Result<(), TransactionError> {
    let mut seen = HashSet::new();
    for instance in self.creating.iter().chain(&self.modifying).chain(&self.deleting) {
      if !seen.insert(instance.instance_id) {
        return Err(TransactionError::Overlap(instance.instance_id));
      }
    }

    let surviving = self.overlay(live);
    let mut graph = DiGraph::<InstanceId, ()>::new();
    let mut nodes = HashMap::new();
    for instance in &surviving {
      nodes.insert(instance.instance_id, graph.add_node(instance.instance_id));
    }
    for instance in &surviving {
      for dependency in &instance.dependencies {
        let Some(&target) = nodes.get(&dependency.instance_id) else {
          return Err(TransactionError::DanglingReference {
            from: instance.instance_id,
            to: dependency.instance_id,
          });
        };
        graph.add_edge(nodes[&instance.instance_id], target, ());
      }
    }

    toposort(&graph, None).map_err(|_| TransactionError::Cycle)?;
    Ok(())
  }
}
