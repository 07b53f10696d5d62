//! Cycle-safe dependency graph traversal.
//!
//! Two walks over the app graph, both depth-first and post-order
//! (children complete before their parent is delivered):
//!
//! - [`walk_desired`] follows the dependency declarations of a catalog
//!   app, i.e. the tree a request *wants* to exist.
//! - [`walk_existing`] follows the stored dependency edges of an
//!   installed instance, i.e. the graph that *does* exist.
//!
//! The walker owns recursion, rendering, and cycle-breaking; everything
//! request-specific (edge gates, alternative choice, overlay lookups,
//! node handling) comes in through a visitor.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use edgeapps_core::{
  App, AppConfiguration, AppDependencyConfig, AppId, AppInstance, ConfigurationTarget, DependencyDeclaration,
  InstanceId, Language, RenderError,
};

use crate::store::AppStore;

/// How far to follow a desired dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeInclusion {
  /// Skip the edge entirely.
  NotIncluded,
  /// Visit the child but not its own dependencies (an existing subgraph
  /// is reused as-is).
  OnlyApp,
  /// Visit the child and resolve its whole subtree.
  WithDependencies,
}

/// A node of the desired tree, delivered post-order.
#[derive(Clone)]
pub struct DesiredNode {
  pub app: Arc<dyn App>,
  pub parent_app: Option<Arc<dyn App>>,
  /// The declaration this node satisfies; `None` for the walk root.
  pub declaration: Option<DependencyDeclaration>,
  /// The alternative chosen for this node, including parent overrides.
  pub dependency_config: AppDependencyConfig,
  pub rendered: AppConfiguration,
}

impl DesiredNode {
  pub fn is_dependency(&self) -> bool {
    self.declaration.is_some()
  }
}

/// Request-specific behavior of a desired walk.
pub trait DesiredVisitor {
  /// Picks one alternative out of a declaration; `None` skips the edge.
  fn choose_alternative(&mut self, alternatives: &[AppDependencyConfig]) -> Option<AppDependencyConfig>;

  /// Decides whether and how deep to follow an edge.
  fn include_edge(&mut self, parent: &dyn App, declaration: &DependencyDeclaration) -> EdgeInclusion;

  /// Instance lookup through the request's overlay (staged instances
  /// shadow the live store).
  fn resolve_instance(&mut self, id: &InstanceId) -> Option<AppInstance>;

  /// Post-order node callback. Returning `false` drops the node from
  /// the walk result without aborting the traversal.
  fn on_node(&mut self, node: &DesiredNode) -> bool;

  /// A node failed to render; it and its subtree are skipped.
  fn render_failed(&mut self, app: &dyn App, error: &RenderError);
}

/// Walks the desired dependency tree of `app`, children before parents.
///
/// Cycles through specific-instance references are broken by a
/// visited-set of entered instance ids; cyclic app declarations are cut
/// at the first repeated app id on the descent path.
pub fn walk_desired<V: DesiredVisitor + ?Sized>(
  store: &dyn AppStore,
  app: Arc<dyn App>,
  config: AppDependencyConfig,
  target: ConfigurationTarget,
  language: Language,
  visitor: &mut V,
) -> Option<DesiredNode> {
  let mut visited = HashSet::new();
  let mut path = Vec::new();
  walk_desired_inner(
    store,
    app,
    None,
    None,
    config,
    target,
    language,
    EdgeInclusion::WithDependencies,
    &mut visited,
    &mut path,
    visitor,
  )
}

#[allow(clippy::too_many_arguments)]
fn walk_desired_inner<V: DesiredVisitor + ?Sized>(
  store: &dyn AppStore,
  app: Arc<dyn App>,
  parent_app: Option<Arc<dyn App>>,
  declaration: Option<&DependencyDeclaration>,
  config: AppDependencyConfig,
  target: ConfigurationTarget,
  language: Language,
  inclusion: EdgeInclusion,
  visited: &mut HashSet<InstanceId>,
  path: &mut Vec<AppId>,
  visitor: &mut V,
) -> Option<DesiredNode> {
  let rendered = match app.render(target, config.alias.as_deref(), &config.effective_properties(), language) {
    Ok(rendered) => rendered,
    Err(error) => {
      debug!(app = %app.app_id(), error = %error, "desired node failed to render");
      visitor.render_failed(app.as_ref(), &error);
      return None;
    }
  };

  if inclusion == EdgeInclusion::WithDependencies {
    path.push(app.app_id().clone());
    for dependency in &rendered.dependencies {
      let Some(mut next_config) = visitor.choose_alternative(&dependency.app_configs) else {
        continue;
      };

      let dependency_app = if let Some(app_id) = &next_config.app_id {
        match store.app_by_id(app_id) {
          Some(found) => found,
          None => {
            debug!(app = %app_id, "dependency app not in catalog; edge skipped");
            continue;
          }
        }
      } else if let Some(specific) = next_config.specific_instance_id {
        if !visited.insert(specific) {
          continue;
        }
        let Some(instance) = visitor.resolve_instance(&specific) else {
          debug!(instance = %specific, "specific dependency instance missing; edge skipped");
          continue;
        };
        let Some(found) = store.app_by_id(&instance.app_id) else {
          continue;
        };
        // carry the instance's own values for everything the
        // declaration leaves open
        for (key, value) in &instance.properties {
          next_config.properties.entry(key.clone()).or_insert_with(|| value.clone());
        }
        found
      } else {
        continue;
      };

      if path.contains(dependency_app.app_id()) {
        warn!(app = %dependency_app.app_id(), "cyclic dependency declaration; edge skipped");
        continue;
      }

      let next_inclusion = visitor.include_edge(app.as_ref(), dependency);
      if next_inclusion == EdgeInclusion::NotIncluded {
        continue;
      }

      walk_desired_inner(
        store,
        dependency_app,
        Some(app.clone()),
        Some(dependency),
        next_config,
        target,
        language,
        next_inclusion,
        visited,
        path,
        visitor,
      );
    }
    path.pop();
  }

  let node = DesiredNode {
    app,
    parent_app,
    declaration: declaration.cloned(),
    dependency_config: config,
    rendered,
  };
  if visitor.on_node(&node) { Some(node) } else { None }
}

/// A node of the installed graph, delivered post-order.
#[derive(Clone)]
pub struct ExistingNode {
  pub app: Arc<dyn App>,
  pub parent_app: Option<Arc<dyn App>>,
  /// The parent's declaration this edge satisfies; `None` for the root.
  pub declaration: Option<DependencyDeclaration>,
  /// The alternative matching this instance. `None` when the stored
  /// edge no longer fits any alternative of the declaration.
  pub dependency_config: Option<AppDependencyConfig>,
  pub rendered: AppConfiguration,
  pub parent_instance: Option<AppInstance>,
  pub instance: AppInstance,
}

impl std::fmt::Debug for ExistingNode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ExistingNode")
      .field("app", self.app.app_id())
      .field("parent_app", &self.parent_app.as_ref().map(|a| a.app_id()))
      .field("declaration", &self.declaration)
      .field("dependency_config", &self.dependency_config)
      .field("rendered", &self.rendered)
      .field("parent_instance", &self.parent_instance)
      .field("instance", &self.instance)
      .finish()
  }
}

impl ExistingNode {
  pub fn is_dependency(&self) -> bool {
    self.declaration.is_some()
  }
}

/// Request-specific behavior of an existing walk.
pub trait ExistingVisitor {
  /// Gates descent. A `false` skips the instance and its subtree; the
  /// node is not delivered.
  fn include_instance(&mut self, parent: Option<&AppInstance>, instance: &AppInstance) -> bool;

  /// Post-order node callback, as in [`DesiredVisitor::on_node`].
  fn on_node(&mut self, node: &ExistingNode) -> bool;
}

/// The walk root could not be resolved or rendered. Failures below the
/// root are recovered locally by skipping the affected edge.
#[derive(Debug, Error)]
pub enum WalkError {
  #[error("app not found: {0}")]
  AppNotFound(AppId),

  #[error("failed to render configuration of '{app_id}': {source}")]
  Render {
    app_id: AppId,
    #[source]
    source: RenderError,
  },
}

/// Walks the stored dependency edges of an installed instance, children
/// before parents. Cycles are broken by a visited-set of instance ids.
pub fn walk_existing<V: ExistingVisitor + ?Sized>(
  store: &dyn AppStore,
  instance: AppInstance,
  target: ConfigurationTarget,
  language: Language,
  visitor: &mut V,
) -> Result<Option<ExistingNode>, WalkError> {
  let mut visited = HashSet::new();
  walk_existing_inner(store, instance, None, None, target, language, &mut visited, visitor)
}

#[allow(clippy::too_many_arguments)]
fn walk_existing_inner<V: ExistingVisitor + ?Sized>(
  store: &dyn AppStore,
  instance: AppInstance,
  parent_instance: Option<AppInstance>,
  declaration: Option<DependencyDeclaration>,
  target: ConfigurationTarget,
  language: Language,
  visited: &mut HashSet<InstanceId>,
  visitor: &mut V,
) -> Result<Option<ExistingNode>, WalkError> {
  let is_root = parent_instance.is_none();
  visited.insert(instance.instance_id);

  let app = match store.app_by_id(&instance.app_id) {
    Some(app) => app,
    None if is_root => return Err(WalkError::AppNotFound(instance.app_id)),
    None => {
      warn!(app = %instance.app_id, instance = %instance.instance_id, "installed app missing from catalog; skipped");
      return Ok(None);
    }
  };

  let rendered = match app.render(target, Some(&instance.alias), &instance.properties, language) {
    Ok(rendered) => rendered,
    Err(source) if is_root => {
      return Err(WalkError::Render { app_id: instance.app_id, source });
    }
    Err(error) => {
      warn!(app = %instance.app_id, error = %error, "installed instance failed to render; skipped");
      return Ok(None);
    }
  };

  if !visitor.include_instance(parent_instance.as_ref(), &instance) {
    return Ok(None);
  }

  for dependency in &instance.dependencies {
    if visited.contains(&dependency.instance_id) {
      continue;
    }
    let Some(child) = store.instance_by_id(&dependency.instance_id) else {
      debug!(instance = %dependency.instance_id, "dangling dependency edge; skipped");
      continue;
    };
    let Some(sub_declaration) = rendered.dependencies.iter().find(|d| d.key == dependency.key) else {
      debug!(key = %dependency.key, "no declaration for stored dependency; skipped");
      continue;
    };
    walk_existing_inner(
      store,
      child,
      Some(instance.clone()),
      Some(sub_declaration.clone()),
      target,
      language,
      visited,
      visitor,
    )?;
  }

  let parent_app = parent_instance.as_ref().and_then(|p| store.app_by_id(&p.app_id));
  let dependency_config = match &declaration {
    None => Some(AppDependencyConfig {
      app_id: Some(instance.app_id.clone()),
      alias: Some(instance.alias.clone()),
      properties: instance.properties.clone(),
      ..Default::default()
    }),
    Some(declaration) => declaration
      .alternative_for(&instance.app_id, &instance.instance_id)
      .cloned(),
  };

  let node = ExistingNode {
    app,
    parent_app,
    declaration,
    dependency_config,
    rendered,
    parent_instance,
    instance,
  };
  if visitor.on_node(&node) { Ok(Some(node)) } else { Ok(None) }
}
