//! Dependency resolution: which concrete instance satisfies a
//! declaration, and whether one must be created.

use edgeapps_core::{AppDependencyConfig, AppInstance, CreatePolicy, DependencyDeclaration};

use crate::store::AppStore;

/// Outcome of the reuse search for one declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum Needed {
  /// No usable instance exists and the policy permits creating one.
  Create,
  /// An existing instance satisfies the declaration.
  Reuse(AppInstance),
  /// No instance exists and the policy forbids creating one.
  Forbidden,
}

/// Picks one alternative out of a declaration's candidates.
///
/// A single alternative is used as-is. With several, the first whose
/// app already has a live instance that nothing depends on wins (the
/// most reusable candidate); otherwise the first alternative.
pub fn choose_alternative(store: &dyn AppStore, alternatives: &[AppDependencyConfig]) -> Option<AppDependencyConfig> {
  if alternatives.is_empty() {
    return None;
  }
  if alternatives.len() == 1 {
    return Some(alternatives[0].clone());
  }

  for alternative in alternatives {
    let lonely = store
      .instances()
      .into_iter()
      .filter(|i| Some(&i.app_id) == alternative.app_id.as_ref())
      .any(|i| store.apps_with_dependency_to(&i).is_empty());
    if lonely {
      return Some(alternative.clone());
    }
  }

  Some(alternatives[0].clone())
}

/// Finds the instance that satisfies `config`, searching the request's
/// overlay (`instances`).
///
/// - A specific instance id resolves to that instance, or to `Create`
///   when it is gone.
/// - Under `CreatePolicy::Always` only an instance with no referrers at
///   all may be reused; anything else gets a dedicated child.
/// - Otherwise the first instance of the app is reused; when none
///   exists the create policy decides between `Create` and `Forbidden`.
pub fn find_needed_app(
  store: &dyn AppStore,
  instances: &[AppInstance],
  declaration: Option<&DependencyDeclaration>,
  config: &AppDependencyConfig,
) -> Needed {
  let Some(declaration) = declaration else {
    return Needed::Create;
  };

  if let Some(specific) = &config.specific_instance_id {
    return match instances.iter().find(|i| i.instance_id == *specific) {
      Some(instance) => Needed::Reuse(instance.clone()),
      None => Needed::Create,
    };
  }

  let Some(app_id) = &config.app_id else {
    return Needed::Forbidden;
  };

  if declaration.create_policy == CreatePolicy::Always {
    let free = instances
      .iter()
      .filter(|i| i.app_id == *app_id)
      .find(|i| store.apps_with_dependency_to(i).is_empty());
    return match free {
      Some(instance) => Needed::Reuse(instance.clone()),
      None => Needed::Create,
    };
  }

  match instances.iter().find(|i| i.app_id == *app_id) {
    Some(instance) => Needed::Reuse(instance.clone()),
    None if declaration.create_policy == CreatePolicy::IfNotExisting => Needed::Create,
    None => Needed::Forbidden,
  }
}
