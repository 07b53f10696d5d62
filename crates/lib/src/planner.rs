//! Transaction planning for install, update and delete requests.
//!
//! Every request runs inside a scoped transaction:
//!
//! 1. Reset all aggregators and open a fresh scratch transaction.
//! 2. Walk the graph, staging instance creations, modifications and
//!    deletions and feeding each node's configuration delta to the
//!    aggregators.
//! 3. Verify the staged plan, then commit the aggregators in fixed
//!    order (components, scheduler, static addresses).
//!
//! Any failure discards the scratch and resets the aggregators; no
//! partial effects are left behind. Warnings accumulate and are
//! returned with the result; traversal errors accumulate and abort the
//! request joined with `|` at the end of the walk phase.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use edgeapps_core::{
  App, AppConfiguration, AppDependencyConfig, AppId, AppInstance, ComponentConfig, ConfigurationTarget, CreatePolicy,
  DeletePolicy, Dependency, DependencyDeclaration, DependencyUpdatePolicy, InstanceId, Language, ModelError,
  Properties, RenderError, UpdatePolicy, User,
};

use crate::aggregate::AggregatorSet;
use crate::component::ComponentRegistry;
use crate::policy;
use crate::reconcile;
use crate::resolve::{self, Needed};
use crate::store::{AppStore, apps_with_reference_to};
use crate::transaction::{Transaction, TransactionError};
use crate::translate::Translator;
use crate::validator::{Validator, ValidatorStatus};
use crate::walk::{
  DesiredNode, DesiredVisitor, EdgeInclusion, ExistingNode, ExistingVisitor, WalkError, walk_desired, walk_existing,
};

/// A request could not be planned or committed.
#[derive(Debug, Error)]
pub enum PlanError {
  /// The validator reports the app as incompatible with this appliance.
  #[error("app is not compatible: {0}")]
  NotCompatible(String),

  /// The validator reports the app as compatible but not installable.
  #[error("app can not be installed: {0}")]
  NotInstallable(String),

  /// A declaration policy forbids the requested change.
  #[error("{0}")]
  PolicyDenied(String),

  /// The request root violates the data model.
  #[error(transparent)]
  Model(#[from] ModelError),

  /// The request root could not be resolved or rendered.
  #[error(transparent)]
  Walk(#[from] WalkError),

  /// Errors collected during traversal, joined with `|`.
  #[error("{0}")]
  Failed(String),

  /// Aggregator commit failures, joined with `|`.
  #[error("{0}")]
  AggregatorFailed(String),

  /// The staged plan violates a structural guarantee.
  #[error("transaction invariant violated: {0}")]
  Internal(#[from] TransactionError),
}

/// Result of a planned request.
#[derive(Debug, Clone, Default)]
pub struct UpdateValues {
  /// The last created or modified instance of the walk; for deletes,
  /// the removed root.
  pub root: Option<AppInstance>,
  pub created_or_modified: Vec<AppInstance>,
  pub deleted: Vec<AppInstance>,
  pub warnings: Vec<String>,
}

/// Plans and commits install/update/delete requests.
///
/// Not re-entrant: the surrounding service must serialize requests.
pub struct AppPlanner<'a> {
  store: &'a dyn AppStore,
  validator: &'a dyn Validator,
  registry: &'a dyn ComponentRegistry,
  translator: &'a dyn Translator,
  aggregators: AggregatorSet,
  temporary: Option<Transaction>,
}

impl<'a> AppPlanner<'a> {
  pub fn new(
    store: &'a dyn AppStore,
    validator: &'a dyn Validator,
    registry: &'a dyn ComponentRegistry,
    translator: &'a dyn Translator,
    aggregators: AggregatorSet,
  ) -> Self {
    Self {
      store,
      validator,
      registry,
      translator,
      aggregators,
      temporary: None,
    }
  }

  /// Installs a new root instance together with its dependencies.
  pub fn install(
    &mut self,
    user: Option<&User>,
    instance: AppInstance,
    app: Arc<dyn App>,
  ) -> Result<UpdateValues, PlanError> {
    self.update(user, None, instance, app)
  }

  /// Updates `old_instance` to `new_instance` (install when `old_instance`
  /// is `None`), resolving the dependency graph below it.
  pub fn update(
    &mut self,
    user: Option<&User>,
    old_instance: Option<AppInstance>,
    new_instance: AppInstance,
    app: Arc<dyn App>,
  ) -> Result<UpdateValues, PlanError> {
    info!(app = %app.app_id(), instance = %new_instance.instance_id, "planning app update");
    self.with_transaction(user, move |planner| {
      planner.update_internal(user, old_instance, new_instance, app)
    })
  }

  /// Deletes an instance, cascading into its dependencies as their
  /// policies allow.
  pub fn delete(&mut self, user: Option<&User>, instance: AppInstance) -> Result<UpdateValues, PlanError> {
    info!(app = %instance.app_id, instance = %instance.instance_id, "planning app delete");
    self.with_transaction(user, move |planner| planner.delete_internal(user, instance))
  }

  /// Snapshot of the in-flight transaction, `None` outside a request.
  pub fn temporary_apps(&self) -> Option<&Transaction> {
    self.temporary.as_ref()
  }

  fn with_transaction(
    &mut self,
    user: Option<&User>,
    operation: impl FnOnce(&mut Self) -> Result<UpdateValues, PlanError>,
  ) -> Result<UpdateValues, PlanError> {
    self.aggregators.reset();
    self.temporary = Some(Transaction::default());

    let result = operation(self);
    let transaction = self.temporary.take().unwrap_or_default();

    let values = match result {
      Ok(values) => values,
      Err(err) => {
        error!(error = %err, "request failed; discarding staged changes");
        self.aggregators.reset();
        return Err(err);
      }
    };

    if let Err(err) = transaction.validate(&self.store.instances()) {
      error!(error = %err, "staged plan failed verification");
      self.aggregators.reset();
      return Err(PlanError::Internal(err));
    }

    let language = language_of(user);
    let mut exclude: Vec<InstanceId> = transaction.modifying().iter().map(|i| i.instance_id).collect();
    exclude.extend(transaction.deleting().iter().map(|i| i.instance_id));
    let other_configs = self.store_configurations(&exclude, language);

    let mut failures = Vec::new();
    for (aggregator, message_key) in self.aggregators.iter_mut() {
      if let Err(err) = aggregator.commit(user, &other_configs) {
        error!(stage = message_key, error = %err, "aggregator commit failed");
        failures.push(self.translator.translate(language, message_key, &[]));
      }
    }
    if !failures.is_empty() {
      self.aggregators.reset();
      return Err(PlanError::AggregatorFailed(failures.join("|")));
    }

    Ok(values)
  }

  fn update_internal(
    &mut self,
    user: Option<&User>,
    old_instance: Option<AppInstance>,
    new_instance: AppInstance,
    app: Arc<dyn App>,
  ) -> Result<UpdateValues, PlanError> {
    let language = language_of(user);
    new_instance.validate()?;

    let mut new_instance = new_instance;
    let mut warnings = Vec::new();
    let mut to_create = Vec::new();

    if old_instance.is_none() {
      self.check_status(app.as_ref(), language)?;
      self.tx_mut().stage_creating(new_instance.clone());
      to_create.push(new_instance.clone());
    } else if let Some(old) = &old_instance {
      // other parents referencing this instance restrict what the
      // caller may change on it
      let mut references = apps_with_reference_to(&self.store.instances(), &[old.instance_id]);
      let deleting: Vec<InstanceId> = self.tx_mut().deleting().iter().map(|i| i.instance_id).collect();
      references.retain(|r| !deleting.contains(&r.instance_id));

      for parent in &references {
        let Some(parent_app) = self.store.app_by_id(&parent.app_id) else {
          continue;
        };
        let Ok(parent_config) =
          parent_app.render(ConfigurationTarget::Update, Some(&parent.alias), &parent.properties, language)
        else {
          continue;
        };

        for declaration in &parent_config.dependencies {
          let edge = parent
            .dependencies
            .iter()
            .find(|d| d.instance_id == old.instance_id && d.key == declaration.key);
          if edge.is_none() {
            continue;
          }
          let Some(alternative) = declaration.alternative_for(&old.app_id, &old.instance_id) else {
            continue;
          };

          match declaration.dependency_update_policy {
            DependencyUpdatePolicy::AllowAll => {}
            DependencyUpdatePolicy::AllowNone => {
              return Err(PlanError::PolicyDenied(self.translator.translate(
                language,
                "appNotAllowedToBeUpdated",
                &[],
              )));
            }
            DependencyUpdatePolicy::AllowOnlyUnconfiguredProperties => {
              for (key, value) in &alternative.properties {
                if new_instance.properties.get(key) != Some(value) {
                  warnings.push(self.translator.translate(language, "canNotChangeProperty", &[key]));
                  new_instance.properties.insert(key.clone(), value.clone());
                }
              }
              if let Some(alias) = &alternative.alias
                && new_instance.alias != *alias
              {
                warnings.push(self.translator.translate(language, "canNotChangeAlias", &[]));
                new_instance.alias = alias.clone();
              }
            }
          }
        }
      }
    }

    let old_nodes = self.old_dependencies(old_instance.as_ref(), language);

    let root_config = AppDependencyConfig {
      app_id: Some(app.app_id().clone()),
      alias: Some(new_instance.alias.clone()),
      properties: new_instance.properties.clone(),
      initial_properties: new_instance.properties.clone(),
      ..Default::default()
    };

    let store = self.store;
    let root_app_id = app.app_id().clone();
    let mut visit = UpdateWalk {
      planner: self,
      language,
      old_instance: old_instance.clone(),
      root_app_id,
      old_nodes,
      to_create,
      pending: Vec::new(),
      warnings,
      errors: Vec::new(),
      last: None,
    };
    walk_desired(store, app, root_config, ConfigurationTarget::Update, language, &mut visit);
    let UpdateWalk { old_nodes, warnings, errors, last, .. } = visit;

    // whatever is left in the old index was not matched by the desired
    // tree and gets removed, policy permitting
    let live = self.store.instances();
    for node in old_nodes.values() {
      let Some(declaration) = &node.declaration else {
        continue;
      };
      if !policy::allowed_to_delete(declaration.delete_policy, &live, node.parent_instance.as_ref(), &node.instance) {
        continue;
      }
      self.aggregators.aggregate(None, Some(&node.rendered));
      self.tx_mut().stage_deleting(node.instance.clone());
    }

    self.update_references_to_removed_instances();

    if !errors.is_empty() {
      return Err(PlanError::Failed(errors.join("|")));
    }

    Ok(UpdateValues {
      root: last,
      created_or_modified: self.tx_mut().created_or_modified(),
      deleted: self.tx_mut().deleting().to_vec(),
      warnings,
    })
  }

  fn delete_internal(&mut self, user: Option<&User>, instance: AppInstance) -> Result<UpdateValues, PlanError> {
    let language = language_of(user);

    let store = self.store;
    let mut visit = DeleteWalk {
      planner: self,
      user: user.cloned(),
      language,
      warnings: Vec::new(),
    };
    walk_existing(store, instance.clone(), ConfigurationTarget::Delete, language, &mut visit)?;
    let DeleteWalk { warnings, .. } = visit;

    self.update_references_to_removed_instances();

    // surviving referrers of the root must allow its deletion
    let deleting: Vec<InstanceId> = self.tx_mut().deleting().iter().map(|i| i.instance_id).collect();
    for referrer in apps_with_reference_to(&self.store.instances(), &[instance.instance_id]) {
      if deleting.contains(&referrer.instance_id) {
        continue;
      }
      let Some(referrer_app) = self.store.app_by_id(&referrer.app_id) else {
        continue;
      };
      let Ok(config) =
        referrer_app.render(ConfigurationTarget::Update, Some(&referrer.alias), &referrer.properties, language)
      else {
        continue;
      };
      for dependency in referrer.dependencies.iter().filter(|d| d.instance_id == instance.instance_id) {
        let Some(declaration) = config.dependencies.iter().find(|dd| dd.key == dependency.key) else {
          continue;
        };
        if !policy::parent_may_delete_child(declaration) {
          return Err(PlanError::PolicyDenied(self.translator.translate(
            language,
            "appNotAllowedToBeDeleted",
            &[],
          )));
        }
      }
    }

    Ok(UpdateValues {
      root: Some(instance),
      created_or_modified: self.tx_mut().created_or_modified(),
      deleted: self.tx_mut().deleting().to_vec(),
      warnings,
    })
  }

  fn check_status(&self, app: &dyn App, language: Language) -> Result<(), PlanError> {
    let config = app.validator_config();
    match self.validator.status(&config) {
      ValidatorStatus::Incompatible => Err(PlanError::NotCompatible(
        self.validator.compatible_messages(&config, language).join(";"),
      )),
      ValidatorStatus::Compatible => Err(PlanError::NotInstallable(
        self.validator.installable_messages(&config, language).join(";"),
      )),
      ValidatorStatus::Installable => Ok(()),
    }
  }

  fn tx_mut(&mut self) -> &mut Transaction {
    self.temporary.get_or_insert_with(Transaction::default)
  }

  /// The request's view: live instances with the scratch applied.
  fn all_instances(&mut self) -> Vec<AppInstance> {
    let live = self.store.instances();
    self.tx_mut().overlay(&live)
  }

  /// Instance lookup preferring staged over live state.
  fn lookup_instance(&mut self, id: &InstanceId) -> Option<AppInstance> {
    if let Some(staged) = self.tx_mut().staged(id) {
      return Some(staged.clone());
    }
    self.store.instance_by_id(id)
  }

  /// Index of the installed graph below `old`, keyed by the parent app
  /// and declaration key of each edge.
  fn old_dependencies(&self, old: Option<&AppInstance>, language: Language) -> BTreeMap<AppKey, ExistingNode> {
    let Some(old) = old else {
      return BTreeMap::new();
    };
    let mut collector = OldDependencyCollector::default();
    match walk_existing(self.store, old.clone(), ConfigurationTarget::Update, language, &mut collector) {
      Ok(_) => collector.nodes,
      Err(err) => {
        error!(instance = %old.instance_id, error = %err, "could not walk stored dependencies");
        BTreeMap::new()
      }
    }
  }

  /// Drops edges into the deleting set from every surviving referrer.
  fn update_references_to_removed_instances(&mut self) {
    let deleting: Vec<InstanceId> = self.tx_mut().deleting().iter().map(|i| i.instance_id).collect();
    if deleting.is_empty() {
      return;
    }
    let overlay = self.all_instances();
    for referrer in apps_with_reference_to(&overlay, &deleting) {
      if deleting.contains(&referrer.instance_id) {
        continue;
      }
      let mut updated = referrer;
      updated.dependencies.retain(|d| !deleting.contains(&d.instance_id));
      self.tx_mut().restage(updated);
    }
  }

  /// Rendered configurations of live instances outside `exclude`.
  fn store_configurations(&self, exclude: &[InstanceId], language: Language) -> Vec<AppConfiguration> {
    let mut configs = Vec::new();
    for instance in self.store.instances() {
      if exclude.contains(&instance.instance_id) {
        continue;
      }
      let Some(app) = self.store.app_by_id(&instance.app_id) else {
        continue;
      };
      match app.render(ConfigurationTarget::Update, Some(&instance.alias), &instance.properties, language) {
        Ok(config) => configs.push(config),
        Err(err) => debug!(instance = %instance.instance_id, error = %err, "live instance failed to render"),
      }
    }
    configs
  }

  /// Components of every other instance in this request's scope: live
  /// ones plus the currently staged creations and modifications.
  fn other_components_for(&mut self, exclude: &InstanceId, language: Language) -> Vec<ComponentConfig> {
    let mut configs = self.store_configurations(&[*exclude], language);
    for staged in self.tx_mut().created_or_modified() {
      if staged.instance_id == *exclude {
        continue;
      }
      let Some(app) = self.store.app_by_id(&staged.app_id) else {
        continue;
      };
      if let Ok(config) =
        app.render(ConfigurationTarget::Update, Some(&staged.alias), &staged.properties, language)
      {
        configs.push(config);
      }
    }
    configs.into_iter().flat_map(|c| c.components).collect()
  }

  fn render_with_reconciled_ids(
    &mut self,
    app: &dyn App,
    old_instance: Option<&AppInstance>,
    instance: &mut AppInstance,
    language: Language,
  ) -> Result<AppConfiguration, RenderError> {
    let other_components = self.other_components_for(&instance.instance_id, language);
    reconcile::config_with_reconciled_ids(self.registry, app, old_instance, instance, &other_components, language)
  }

  /// Removes properties that must not be persisted (secrets).
  fn strip_transient_properties(&self, instance: &mut AppInstance) {
    let Some(app) = self.store.app_by_id(&instance.app_id) else {
      return;
    };
    for descriptor in app.properties() {
      if !descriptor.is_persistable {
        instance.properties.remove(&descriptor.name);
      }
    }
  }

  /// An unsatisfied declaration of `instance` that `app_id`/`child`
  /// could fill.
  fn needed_dependency_to(
    &self,
    instance: &AppInstance,
    app_id: &AppId,
    child: &InstanceId,
    language: Language,
  ) -> Option<DependencyDeclaration> {
    let app = self.store.app_by_id(&instance.app_id)?;
    let config = app
      .render(ConfigurationTarget::Update, Some(&instance.alias), &instance.properties, language)
      .ok()?;
    config.dependencies.into_iter().find(|declaration| {
      if instance.dependencies.iter().any(|d| d.key == declaration.key) {
        return false;
      }
      declaration
        .app_configs
        .iter()
        .any(|c| c.app_id.as_ref() == Some(app_id) || c.specific_instance_id.as_ref() == Some(child))
    })
  }
}

fn language_of(user: Option<&User>) -> Language {
  user.map(|u| u.language).unwrap_or_default()
}

/// Index key of the old-dependency map: parent app, declaration key,
/// and (for edges being replaced by a different app) the actual app
/// of the old child so the entry survives until the removal phase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct AppKey {
  app_id: AppId,
  key: String,
  actual: Option<AppId>,
}

impl AppKey {
  fn new(app_id: AppId, key: String) -> Self {
    Self { app_id, key, actual: None }
  }
}

#[derive(Default)]
struct OldDependencyCollector {
  nodes: BTreeMap<AppKey, ExistingNode>,
}

impl ExistingVisitor for OldDependencyCollector {
  fn include_instance(&mut self, _parent: Option<&AppInstance>, _instance: &AppInstance) -> bool {
    true
  }

  fn on_node(&mut self, node: &ExistingNode) -> bool {
    if let (Some(declaration), Some(parent)) = (&node.declaration, &node.parent_instance) {
      self
        .nodes
        .insert(AppKey::new(parent.app_id.clone(), declaration.key.clone()), node.clone());
    }
    true
  }
}

/// The previously installed counterpart of a desired node.
struct OldCounterpart {
  instance: AppInstance,
  rendered: Option<AppConfiguration>,
}

/// Desired-walk visitor of the update path.
struct UpdateWalk<'p, 'a> {
  planner: &'p mut AppPlanner<'a>,
  language: Language,
  old_instance: Option<AppInstance>,
  root_app_id: AppId,
  old_nodes: BTreeMap<AppKey, ExistingNode>,
  to_create: Vec<AppInstance>,
  /// Children resolved below the node currently being assembled,
  /// waiting to be claimed by the parent that declared them.
  pending: Vec<(Option<DependencyDeclaration>, AppInstance)>,
  warnings: Vec<String>,
  errors: Vec<String>,
  last: Option<AppInstance>,
}

impl DesiredVisitor for UpdateWalk<'_, '_> {
  fn choose_alternative(&mut self, alternatives: &[AppDependencyConfig]) -> Option<AppDependencyConfig> {
    resolve::choose_alternative(self.planner.store, alternatives)
  }

  fn include_edge(&mut self, parent: &dyn App, declaration: &DependencyDeclaration) -> EdgeInclusion {
    let key = AppKey::new(parent.app_id().clone(), declaration.key.clone());

    let mut old_node_present = false;
    if let Some(node) = self.old_nodes.get(&key) {
      let existing_app_id = node.instance.app_id.clone();
      if declaration.app_configs.iter().any(|c| c.app_id.as_ref() == Some(&existing_app_id)) {
        old_node_present = true;
      } else {
        // the old child's app is no longer an alternative: replace it.
        // The child is re-keyed so it is removed at the end of the
        // walk; its subtree stays indexed and is removed edge by edge,
        // each under its own delete policy.
        if let Some(node) = self.old_nodes.remove(&key) {
          let rekeyed = AppKey { actual: Some(existing_app_id), ..key.clone() };
          self.old_nodes.insert(rekeyed, node);
        }
      }
    }

    let chosen = resolve::choose_alternative(self.planner.store, &declaration.app_configs);
    let overlay = self.planner.all_instances();
    let needed = chosen
      .as_ref()
      .map(|config| resolve::find_needed_app(self.planner.store, &overlay, Some(declaration), config));

    if !old_node_present
      && (declaration.create_policy == CreatePolicy::Always
        || (declaration.create_policy == CreatePolicy::IfNotExisting && needed == Some(Needed::Create)))
    {
      let Some(config) = chosen else {
        return EdgeInclusion::NotIncluded;
      };
      let (app_id, instance_id, dependencies) = if let Some(app_id) = &config.app_id {
        (app_id.clone(), InstanceId::random(), Vec::new())
      } else if let Some(specific) = &config.specific_instance_id {
        match self.planner.lookup_instance(specific) {
          Some(instance) => (instance.app_id, instance.instance_id, instance.dependencies),
          None => return EdgeInclusion::NotIncluded,
        }
      } else {
        return EdgeInclusion::NotIncluded;
      };

      // probe that a fresh instance could actually render
      let Some(dependency_app) = self.planner.store.app_by_id(&app_id) else {
        return EdgeInclusion::NotIncluded;
      };
      if dependency_app
        .render(ConfigurationTarget::Add, config.alias.as_deref(), &config.initial_properties, self.language)
        .is_err()
      {
        return EdgeInclusion::NotIncluded;
      }

      let tentative = AppInstance {
        app_id,
        alias: config.alias.clone().unwrap_or_default(),
        instance_id,
        properties: config.initial_properties.clone(),
        dependencies,
      };
      self.planner.tx_mut().stage_creating(tentative.clone());
      self.to_create.push(tentative);
      return EdgeInclusion::WithDependencies;
    }

    // a candidate this request is already creating must not be
    // resolved a second time
    if let Some(Needed::Reuse(candidate)) = &needed
      && self.planner.tx_mut().is_creating(&candidate.instance_id)
    {
      return EdgeInclusion::NotIncluded;
    }

    if old_node_present && let Some(node) = self.old_nodes.get(&key) {
      // the existing subgraph is reused as-is; nothing below it may be
      // treated as a removal
      let old_child = node.instance.clone();
      self.prune_nodes_below(&old_child);
    }
    EdgeInclusion::OnlyApp
  }

  fn resolve_instance(&mut self, id: &InstanceId) -> Option<AppInstance> {
    self.planner.lookup_instance(id)
  }

  fn on_node(&mut self, node: &DesiredNode) -> bool {
    let mut dependency_config = node.dependency_config.clone();
    let counterpart = self.existing_counterpart(node, &mut dependency_config);

    // claim the children resolved below this node
    let mut dependencies = Vec::new();
    let declared = node.rendered.dependencies.clone();
    self.pending.retain(|(declaration, child)| match declaration {
      Some(declaration) if declared.iter().any(|d| d == declaration) => {
        dependencies.push(Dependency::new(declaration.key.clone(), child.instance_id));
        false
      }
      _ => true,
    });

    match counterpart {
      None => self.visit_new(node, dependency_config, dependencies),
      Some(counterpart) => self.visit_existing(node, dependency_config, dependencies, counterpart),
    }
  }

  fn render_failed(&mut self, app: &dyn App, _error: &RenderError) {
    let name = app.name(self.language);
    self
      .errors
      .push(self.planner.translator.translate(self.language, "canNotGetAppConfigurationOfApp", &[&name]));
  }
}

impl UpdateWalk<'_, '_> {
  fn translate(&self, key: &str, args: &[&str]) -> String {
    self.planner.translator.translate(self.language, key, args)
  }

  /// Forgets the whole old-index subtree below `parent`; nothing in it
  /// is a removal.
  fn prune_nodes_below(&mut self, parent: &AppInstance) {
    let mut queue = vec![parent.instance_id];
    while let Some(current) = queue.pop() {
      let children: Vec<AppKey> = self
        .old_nodes
        .iter()
        .filter(|(_, node)| node.parent_instance.as_ref().map(|p| p.instance_id) == Some(current))
        .map(|(key, _)| key.clone())
        .collect();
      for key in children {
        if let Some(node) = self.old_nodes.remove(&key) {
          queue.push(node.instance.instance_id);
        }
      }
    }
  }

  /// Pops the installed counterpart of a desired node out of the old
  /// index, carrying forward properties the declaration leaves unset.
  fn existing_counterpart(
    &mut self,
    node: &DesiredNode,
    dependency_config: &mut AppDependencyConfig,
  ) -> Option<OldCounterpart> {
    let old_root = self.old_instance.clone()?;

    if node.is_dependency() && old_root.app_id == self.root_app_id {
      let parent_app = node.parent_app.as_ref()?;
      let declaration = node.declaration.as_ref()?;
      let key = AppKey::new(parent_app.app_id().clone(), declaration.key.clone());
      let found = self.old_nodes.remove(&key)?;
      if let Some(alternative) = &found.dependency_config {
        for (property, value) in &alternative.properties {
          dependency_config
            .properties
            .entry(property.clone())
            .or_insert_with(|| value.clone());
        }
      }
      Some(OldCounterpart {
        instance: found.instance,
        rendered: Some(found.rendered),
      })
    } else if !node.is_dependency() {
      let rendered = node
        .app
        .render(ConfigurationTarget::Update, Some(&old_root.alias), &old_root.properties, self.language)
        .map_err(|err| {
          error!(instance = %old_root.instance_id, error = %err, "old root failed to render");
          err
        })
        .ok();
      Some(OldCounterpart { instance: old_root, rendered })
    } else {
      None
    }
  }

  /// A desired node without an installed counterpart: reuse a live
  /// instance or finish the tentative creation registered during edge
  /// inclusion.
  fn visit_new(&mut self, node: &DesiredNode, dependency_config: AppDependencyConfig, dependencies: Vec<Dependency>) -> bool {
    let overlay = self.planner.all_instances();
    let needed = resolve::find_needed_app(self.planner.store, &overlay, node.declaration.as_ref(), &dependency_config);
    if needed == Needed::Forbidden {
      return false;
    }
    let reuse = match &needed {
      Needed::Reuse(found) if !self.to_create.iter().any(|t| t.instance_id == found.instance_id) => {
        Some(found.clone())
      }
      _ => None,
    };

    let mut dependency_config = dependency_config;
    let mut dependencies = dependencies;
    let mut alias = dependency_config.alias.clone();
    let mut old_config = None;
    let mut old_of_current = None;
    let instance_id;
    let properties;

    if let Some(existing) = &reuse {
      instance_id = existing.instance_id;
      old_of_current = Some(existing.clone());
      let update_policy = node.declaration.as_ref().map(|d| d.update_policy).unwrap_or(UpdatePolicy::Always);
      let live = self.planner.store.instances();

      if policy::allowed_to_update(update_policy, &live, None, existing) {
        match node
          .app
          .render(ConfigurationTarget::Update, Some(&existing.alias), &existing.properties, self.language)
        {
          Ok(config) => {
            old_config = Some(config);
            for (property, value) in &existing.properties {
              dependency_config
                .properties
                .entry(property.clone())
                .or_insert_with(|| value.clone());
            }
            if alias.is_none() {
              alias = Some(existing.alias.clone());
            }
          }
          Err(err) => {
            error!(app = %node.app.app_id(), error = %err, "reused dependency failed to render");
            self.errors.push(self.translate("canNotGetAppConfiguration", &[]));
          }
        }
        properties = dependency_config.properties.clone();
      } else {
        alias = Some(existing.alias.clone());
        dependencies = existing.dependencies.clone();
        properties = existing.properties.clone();
      }
    } else {
      let Some(position) = self.to_create.iter().position(|t| t.app_id == *node.app.app_id()) else {
        error!(app = %node.app.app_id(), "no tentative creation for resolved dependency");
        self.errors.push(self.translate("canNotGetAppConfiguration", &[]));
        return false;
      };
      let tentative = self.to_create.remove(position);
      instance_id = tentative.instance_id;
      if alias.is_none() {
        alias = Some(node.app.name(self.language));
      }
      let mut created = dependency_config.initial_properties.clone();
      self.adopt_fresh_child(node, instance_id, &mut created);
      properties = created;
    }

    let new_instance = AppInstance {
      app_id: node.app.app_id().clone(),
      alias: alias.unwrap_or_default(),
      instance_id,
      properties,
      dependencies,
    };

    let mut final_instance = new_instance.clone();
    match self
      .planner
      .render_with_reconciled_ids(node.app.as_ref(), old_of_current.as_ref(), &mut final_instance, self.language)
    {
      Ok(new_config) => {
        self.planner.strip_transient_properties(&mut final_instance);
        let unchanged = match &reuse {
          Some(existing) => final_instance.same_content(existing) && old_config.as_ref() == Some(&new_config),
          None => false,
        };
        if !unchanged {
          self.stage(final_instance.clone(), reuse.is_some());
          self.planner.aggregators.aggregate(Some(&new_config), old_config.as_ref());
        }
        self.record(node, final_instance);
      }
      Err(err) => {
        error!(app = %node.app.app_id(), error = %err, "new configuration failed to render");
        self.errors.push(self.translate("canNotGetAppConfiguration", &[]));
        self.stage(new_instance.clone(), reuse.is_some());
        self.record(node, new_instance);
      }
    }
    true
  }

  /// A desired node matched by an installed counterpart: compute the
  /// replacement instance and stage it when something changed.
  fn visit_existing(
    &mut self,
    node: &DesiredNode,
    dependency_config: AppDependencyConfig,
    dependencies: Vec<Dependency>,
    counterpart: OldCounterpart,
  ) -> bool {
    let mut dependencies = dependencies;

    // carry forward surviving edges not re-claimed during this walk
    let overlay = self.planner.all_instances();
    for dependency in &counterpart.instance.dependencies {
      if dependencies.iter().any(|d| d.key == dependency.key) {
        continue;
      }
      if !overlay.iter().any(|i| i.instance_id == dependency.instance_id) {
        continue;
      }
      dependencies.push(dependency.clone());
    }

    if let (Some(declaration), Some(parent_app)) = (node.declaration.as_ref(), node.parent_app.as_ref()) {
      let parent = match &self.old_instance {
        Some(old_root) if *parent_app.app_id() == old_root.app_id => Some(old_root.clone()),
        _ => self
          .old_nodes
          .values()
          .find(|n| n.app.app_id() == parent_app.app_id())
          .map(|n| n.instance.clone()),
      };
      let live = self.planner.store.instances();
      if !policy::allowed_to_update(declaration.update_policy, &live, parent.as_ref(), &counterpart.instance) {
        // still a dependency, but read-only for this parent
        self.record(node, counterpart.instance.clone());
        return true;
      }
    }

    let alias = dependency_config.alias.clone().unwrap_or_else(|| {
      if counterpart.instance.alias.is_empty() {
        node.app.name(self.language)
      } else {
        counterpart.instance.alias.clone()
      }
    });

    let mut properties = dependency_config.properties.clone();
    if node.is_dependency() {
      // keep values the user set on the child itself
      for (property, value) in &counterpart.instance.properties {
        properties.entry(property.clone()).or_insert_with(|| value.clone());
      }
    }

    let new_instance = AppInstance {
      app_id: node.app.app_id().clone(),
      alias,
      instance_id: counterpart.instance.instance_id,
      properties,
      dependencies,
    };

    let mut final_instance = new_instance.clone();
    match self.planner.render_with_reconciled_ids(
      node.app.as_ref(),
      Some(&counterpart.instance),
      &mut final_instance,
      self.language,
    ) {
      Ok(new_config) => {
        self.planner.strip_transient_properties(&mut final_instance);
        let unchanged =
          final_instance.same_content(&counterpart.instance) && counterpart.rendered.as_ref() == Some(&new_config);
        if !unchanged {
          self.planner.tx_mut().stage_modifying(final_instance.clone());
          self.planner.aggregators.aggregate(Some(&new_config), counterpart.rendered.as_ref());
        }
        self.record(node, final_instance);
      }
      Err(err) => {
        error!(app = %node.app.app_id(), error = %err, "updated configuration failed to render");
        self.errors.push(self.translate("canNotGetAppConfiguration", &[]));
        self.record(node, new_instance);
      }
    }
    true
  }

  /// A freshly created instance may satisfy other parents' unsatisfied
  /// declarations. At most one adopter is wired up; candidates whose
  /// declaration always creates its own child only serve as fallback.
  fn adopt_fresh_child(&mut self, node: &DesiredNode, child_id: InstanceId, properties: &mut Properties) {
    let child_app_id = node.app.app_id().clone();
    let overlay = self.planner.all_instances();

    let mut candidates = Vec::new();
    let mut fallbacks = Vec::new();
    for instance in overlay {
      if instance.instance_id == child_id {
        continue;
      }
      // parents taking part in this walk claim their edges themselves;
      // only bystanders are candidates for adoption
      if self.planner.tx_mut().is_creating(&instance.instance_id)
        || self.old_instance.as_ref().map(|i| i.instance_id) == Some(instance.instance_id)
        || self.old_nodes.values().any(|n| n.instance.instance_id == instance.instance_id)
      {
        continue;
      }
      let Some(declaration) = self
        .planner
        .needed_dependency_to(&instance, &child_app_id, &child_id, self.language)
      else {
        continue;
      };
      if declaration.create_policy == CreatePolicy::Always {
        fallbacks.push((instance, declaration));
      } else {
        candidates.push((instance, declaration));
      }
    }

    let order = |a: &(AppInstance, DependencyDeclaration), b: &(AppInstance, DependencyDeclaration)| {
      (&a.1.key, &a.0.alias, a.0.instance_id).cmp(&(&b.1.key, &b.0.alias, b.0.instance_id))
    };
    candidates.sort_by(order);
    fallbacks.sort_by(order);

    let Some((adopter, declaration)) = candidates.into_iter().next().or_else(|| fallbacks.into_iter().next()) else {
      return;
    };

    if declaration.dependency_update_policy != DependencyUpdatePolicy::AllowAll
      && let Some(config) = resolve::choose_alternative(self.planner.store, &declaration.app_configs)
    {
      for (property, value) in &config.properties {
        if properties.get(property) != Some(value) {
          self.warnings.push(self.translate("overrideProperty", &[property]));
        }
        properties.insert(property.clone(), value.clone());
      }
    }

    let mut updated = self
      .planner
      .tx_mut()
      .staged(&adopter.instance_id)
      .cloned()
      .unwrap_or(adopter);
    updated.dependencies.push(Dependency::new(declaration.key.clone(), child_id));
    debug!(parent = %updated.instance_id, child = %child_id, key = %declaration.key, "fresh dependency adopted");
    self.planner.tx_mut().restage(updated);
  }

  fn stage(&mut self, instance: AppInstance, reused: bool) {
    if reused {
      self.planner.tx_mut().stage_modifying(instance);
    } else {
      self.planner.tx_mut().stage_creating(instance);
    }
  }

  fn record(&mut self, node: &DesiredNode, instance: AppInstance) {
    self.last = Some(instance.clone());
    self.pending.push((node.declaration.clone(), instance));
  }
}

/// Existing-walk visitor of the delete path.
struct DeleteWalk<'p, 'a> {
  planner: &'p mut AppPlanner<'a>,
  user: Option<User>,
  language: Language,
  warnings: Vec<String>,
}

impl ExistingVisitor for DeleteWalk<'_, '_> {
  fn include_instance(&mut self, parent: Option<&AppInstance>, instance: &AppInstance) -> bool {
    let Some(parent) = parent else {
      return true;
    };
    let store = self.planner.store;
    let Some(parent_app) = store.app_by_id(&parent.app_id) else {
      return false;
    };
    let Ok(config) = parent_app.render(ConfigurationTarget::Delete, Some(&parent.alias), &parent.properties, self.language)
    else {
      return false;
    };
    let Some(edge) = parent.dependencies.iter().find(|d| d.instance_id == instance.instance_id) else {
      return false;
    };
    let Some(declaration) = config.dependencies.iter().find(|d| d.key == edge.key) else {
      return false;
    };

    let keep = match declaration.delete_policy {
      DeletePolicy::Never => true,
      DeletePolicy::Always => false,
      DeletePolicy::IfMine => {
        let mut referrers = apps_with_reference_to(&store.instances(), &[instance.instance_id]);
        referrers.retain(|r| !self.planner.tx_mut().is_deleting(&r.instance_id));
        referrers.iter().any(|r| r.instance_id != parent.instance_id)
      }
    };
    if !keep {
      return true;
    }

    // a kept read-write dependency is demoted before its parent goes
    if declaration.update_policy == UpdatePolicy::Always {
      self.demote(declaration, instance);
    }
    false
  }

  fn on_node(&mut self, node: &ExistingNode) -> bool {
    self.planner.tx_mut().stage_deleting(node.instance.clone());
    self.planner.aggregators.aggregate(None, Some(&node.rendered));
    true
  }
}

impl DeleteWalk<'_, '_> {
  /// Re-runs a surviving child through the update path with the
  /// declaration's overrides applied.
  fn demote(&mut self, declaration: &DependencyDeclaration, instance: &AppInstance) {
    let mut properties = instance.properties.clone();
    let mut alias = instance.alias.clone();
    if let Some(alternative) = declaration.alternative_for(&instance.app_id, &instance.instance_id) {
      for (property, value) in &alternative.properties {
        properties.insert(property.clone(), value.clone());
      }
      if let Some(declared) = &alternative.alias {
        alias = declared.clone();
      }
    }

    let Some(app) = self.planner.store.app_by_id(&instance.app_id) else {
      return;
    };
    let update = AppInstance {
      app_id: instance.app_id.clone(),
      alias,
      instance_id: instance.instance_id,
      properties,
      dependencies: Vec::new(),
    };
    if let Err(err) = self
      .planner
      .update_internal(self.user.as_ref(), Some(instance.clone()), update, app)
    {
      warn!(instance = %instance.instance_id, error = %err, "could not demote dependency before delete");
      self.warnings.push(err.to_string());
    }
  }
}
