//! Policy predicates.
//!
//! Pure functions evaluating the declaration policies against the
//! current instance graph. Kept as free functions so the declaration
//! types stay plain values.

use edgeapps_core::{
  AppInstance, CreatePolicy, DeletePolicy, DependencyDeclaration, DependencyDeletePolicy, DependencyUpdatePolicy,
  InstanceId, Properties, UpdatePolicy,
};

/// Whether resolving `declaration` may create a fresh instance.
///
/// `IfNotExisting` only permits creation when no instance of any
/// alternative app exists that is free of other referrers.
pub fn allowed_to_create(declaration: &DependencyDeclaration, instances: &[AppInstance]) -> bool {
  match declaration.create_policy {
    CreatePolicy::Always => true,
    CreatePolicy::Never => false,
    CreatePolicy::IfNotExisting => !declaration.app_configs.iter().any(|config| {
      instances
        .iter()
        .filter(|i| Some(&i.app_id) == config.app_id.as_ref())
        .any(|i| !has_other_referrer(instances, &i.instance_id, None))
    }),
  }
}

/// Whether `parent` may rewrite `child`'s properties.
pub fn allowed_to_update(
  policy: UpdatePolicy,
  instances: &[AppInstance],
  parent: Option<&AppInstance>,
  child: &AppInstance,
) -> bool {
  match policy {
    UpdatePolicy::Always => true,
    UpdatePolicy::Never => false,
    UpdatePolicy::IfMine => is_only_referrer(instances, parent, &child.instance_id),
  }
}

/// Whether deleting `parent` may cascade into `child`.
pub fn allowed_to_delete(
  policy: DeletePolicy,
  instances: &[AppInstance],
  parent: Option<&AppInstance>,
  child: &AppInstance,
) -> bool {
  match policy {
    DeletePolicy::Always => true,
    DeletePolicy::Never => false,
    DeletePolicy::IfMine => is_only_referrer(instances, parent, &child.instance_id),
  }
}

/// Whether the child itself may set `property` while the parent declares
/// the values in `parent_values`.
pub fn child_may_override(declaration: &DependencyDeclaration, property: &str, parent_values: &Properties) -> bool {
  match declaration.dependency_update_policy {
    DependencyUpdatePolicy::AllowAll => true,
    DependencyUpdatePolicy::AllowNone => false,
    DependencyUpdatePolicy::AllowOnlyUnconfiguredProperties => !parent_values.contains_key(property),
  }
}

/// Whether the child may be deleted while this parent exists.
pub fn parent_may_delete_child(declaration: &DependencyDeclaration) -> bool {
  declaration.dependency_delete_policy != DependencyDeletePolicy::NotAllowed
}

/// True when every referrer of `child` in `instances` is `parent`.
/// Vacuously true when nothing refers to the child.
fn is_only_referrer(instances: &[AppInstance], parent: Option<&AppInstance>, child: &InstanceId) -> bool {
  instances
    .iter()
    .filter(|i| i.references(child))
    .all(|i| Some(i.instance_id) == parent.map(|p| p.instance_id))
}

fn has_other_referrer(instances: &[AppInstance], child: &InstanceId, except: Option<&InstanceId>) -> bool {
  instances
    .iter()
    .filter(|i| Some(&i.instance_id) != except)
    .any(|i| i.references(child))
}

#[cfg(test)]
mod tests {
  use super::*;
  use edgeapps_core::{AppDependencyConfig, AppId, Dependency};
  use serde_json::json;

  fn make_instance(app_id: &str, alias: &str) -> AppInstance {
    AppInstance::new(AppId::new(app_id), alias, Properties::new())
  }

  fn make_declaration(create: CreatePolicy) -> DependencyDeclaration {
    let mut declaration =
      DependencyDeclaration::new("meter", vec![AppDependencyConfig::for_app(AppId::new("App.Meter"))]);
    declaration.create_policy = create;
    declaration
  }

  #[test]
  fn create_always_and_never() {
    let meter = make_instance("App.Meter", "meter");
    assert!(allowed_to_create(&make_declaration(CreatePolicy::Always), &[meter.clone()]));
    assert!(!allowed_to_create(&make_declaration(CreatePolicy::Never), &[]));
  }

  #[test]
  fn create_if_not_existing_blocks_on_free_instance() {
    let declaration = make_declaration(CreatePolicy::IfNotExisting);
    let meter = make_instance("App.Meter", "meter");

    assert!(allowed_to_create(&declaration, &[]));
    // A free meter exists: reuse it instead of creating another.
    assert!(!allowed_to_create(&declaration, &[meter.clone()]));

    // The only meter is owned by another parent.
    let mut owner = make_instance("App.BatteryMonitor", "bm");
    owner.dependencies.push(Dependency::new("meter", meter.instance_id));
    assert!(allowed_to_create(&declaration, &[meter, owner]));
  }

  #[test]
  fn if_mine_requires_sole_referrer() {
    let child = make_instance("App.Meter", "meter");
    let mut parent = make_instance("App.BatteryMonitor", "bm");
    parent.dependencies.push(Dependency::new("meter", child.instance_id));

    let instances = vec![child.clone(), parent.clone()];
    assert!(allowed_to_update(UpdatePolicy::IfMine, &instances, Some(&parent), &child));
    assert!(allowed_to_delete(DeletePolicy::IfMine, &instances, Some(&parent), &child));

    let mut second = make_instance("App.Other", "x");
    second.dependencies.push(Dependency::new("m", child.instance_id));
    let instances = vec![child.clone(), parent.clone(), second];
    assert!(!allowed_to_update(UpdatePolicy::IfMine, &instances, Some(&parent), &child));
    assert!(!allowed_to_delete(DeletePolicy::IfMine, &instances, Some(&parent), &child));
  }

  #[test]
  fn if_mine_is_vacuously_true_without_referrers() {
    let child = make_instance("App.Meter", "meter");
    assert!(allowed_to_update(UpdatePolicy::IfMine, &[child.clone()], None, &child));
  }

  #[test]
  fn child_override_follows_dependency_update_policy() {
    let mut declaration = make_declaration(CreatePolicy::Always);
    let mut parent_values = Properties::new();
    parent_values.insert("type".to_string(), json!("GRID"));

    declaration.dependency_update_policy = DependencyUpdatePolicy::AllowAll;
    assert!(child_may_override(&declaration, "type", &parent_values));

    declaration.dependency_update_policy = DependencyUpdatePolicy::AllowNone;
    assert!(!child_may_override(&declaration, "invert", &parent_values));

    declaration.dependency_update_policy = DependencyUpdatePolicy::AllowOnlyUnconfiguredProperties;
    assert!(!child_may_override(&declaration, "type", &parent_values));
    assert!(child_may_override(&declaration, "invert", &parent_values));
  }

  #[test]
  fn dependency_delete_policy_gate() {
    let mut declaration = make_declaration(CreatePolicy::Always);
    assert!(parent_may_delete_child(&declaration));
    declaration.dependency_delete_policy = DependencyDeletePolicy::NotAllowed;
    assert!(!parent_may_delete_child(&declaration));
  }
}
