//! The app catalog and instance store contract.

use std::sync::Arc;

use edgeapps_core::{App, AppId, AppInstance, InstanceId};

/// Read access to the catalog and the live instance graph.
///
/// The planner reads a consistent snapshot at request entry; the store
/// owner is responsible for serializing requests against mutations.
pub trait AppStore {
  /// Catalog entry for an app id.
  fn app_by_id(&self, id: &AppId) -> Option<Arc<dyn App>>;

  /// A live installed instance by identity.
  fn instance_by_id(&self, id: &InstanceId) -> Option<AppInstance>;

  /// Snapshot of all live installed instances.
  fn instances(&self) -> Vec<AppInstance>;

  /// Live instances holding a dependency edge to `instance`.
  fn apps_with_dependency_to(&self, instance: &AppInstance) -> Vec<AppInstance> {
    apps_with_reference_to(&self.instances(), &[instance.instance_id])
  }
}

/// Instances in `instances` holding an edge to any of `ids`.
pub fn apps_with_reference_to(instances: &[AppInstance], ids: &[InstanceId]) -> Vec<AppInstance> {
  instances
    .iter()
    .filter(|i| !i.dependencies.is_empty())
    .filter(|i| i.dependencies.iter().any(|d| ids.contains(&d.instance_id)))
    .cloned()
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use edgeapps_core::{AppId, Dependency, Properties};

  fn make_instance(alias: &str) -> AppInstance {
    AppInstance::new(AppId::new("App.Test"), alias, Properties::new())
  }

  #[test]
  fn reference_lookup_matches_any_listed_id() {
    let target = make_instance("target");
    let other = make_instance("other");
    let mut referrer = make_instance("referrer");
    referrer.dependencies.push(Dependency::new("dep", target.instance_id));

    let instances = vec![target.clone(), other.clone(), referrer.clone()];

    let found = apps_with_reference_to(&instances, &[target.instance_id]);
    assert_eq!(found, vec![referrer.clone()]);

    let found = apps_with_reference_to(&instances, &[other.instance_id]);
    assert!(found.is_empty());
  }
}
