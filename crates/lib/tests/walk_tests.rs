//! Traversal ordering and cycle-safety of the graph walkers.

mod common;

use common::*;

use edgeapps::walk::{
  DesiredNode, DesiredVisitor, EdgeInclusion, ExistingNode, ExistingVisitor, WalkError, walk_desired, walk_existing,
};
use edgeapps_core::{
  App, AppDependencyConfig, AppId, AppInstance, ConfigurationTarget, Dependency, DependencyDeclaration, InstanceId,
  Language, RenderError,
};

fn dependency(key: &str, app: &str) -> DependencyDeclaration {
  DependencyDeclaration::new(key, vec![AppDependencyConfig::for_app(AppId::new(app))])
}

fn root_config(app: &str) -> AppDependencyConfig {
  AppDependencyConfig::for_app(AppId::new(app))
}

/// Follows every edge and records the delivery order.
#[derive(Default)]
struct DesiredRecorder {
  order: Vec<String>,
  instances: Vec<AppInstance>,
  failures: usize,
}

impl DesiredVisitor for DesiredRecorder {
  fn choose_alternative(&mut self, alternatives: &[AppDependencyConfig]) -> Option<AppDependencyConfig> {
    alternatives.first().cloned()
  }

  fn include_edge(&mut self, _parent: &dyn App, _declaration: &DependencyDeclaration) -> EdgeInclusion {
    EdgeInclusion::WithDependencies
  }

  fn resolve_instance(&mut self, id: &InstanceId) -> Option<AppInstance> {
    self.instances.iter().find(|i| i.instance_id == *id).cloned()
  }

  fn on_node(&mut self, node: &DesiredNode) -> bool {
    self.order.push(node.app.app_id().0.clone());
    true
  }

  fn render_failed(&mut self, _app: &dyn App, _error: &RenderError) {
    self.failures += 1;
  }
}

#[derive(Default)]
struct ExistingRecorder {
  order: Vec<String>,
  skip: Option<InstanceId>,
}

impl ExistingVisitor for ExistingRecorder {
  fn include_instance(&mut self, _parent: Option<&AppInstance>, instance: &AppInstance) -> bool {
    self.skip != Some(instance.instance_id)
  }

  fn on_node(&mut self, node: &ExistingNode) -> bool {
    self.order.push(node.instance.alias.clone());
    true
  }
}

#[test]
fn desired_walk_delivers_children_before_parents() {
  let store = InMemoryStore::default()
    .with_app(FixtureApp::new("App.A").with_declaration(dependency("b", "App.B")))
    .with_app(FixtureApp::new("App.B").with_declaration(dependency("c", "App.C")))
    .with_app(FixtureApp::new("App.C"));

  let mut recorder = DesiredRecorder::default();
  let root = walk_desired(
    &store,
    store.app("App.A"),
    root_config("App.A"),
    ConfigurationTarget::Update,
    Language::En,
    &mut recorder,
  );

  assert_eq!(recorder.order, vec!["App.C", "App.B", "App.A"]);
  assert_eq!(root.map(|n| n.app.app_id().clone()), Some(AppId::new("App.A")));
}

#[test]
fn desired_walk_visits_siblings_in_declaration_order() {
  let store = InMemoryStore::default()
    .with_app(
      FixtureApp::new("App.Root")
        .with_declaration(dependency("first", "App.X"))
        .with_declaration(dependency("second", "App.Y")),
    )
    .with_app(FixtureApp::new("App.X"))
    .with_app(FixtureApp::new("App.Y"));

  let mut recorder = DesiredRecorder::default();
  walk_desired(
    &store,
    store.app("App.Root"),
    root_config("App.Root"),
    ConfigurationTarget::Update,
    Language::En,
    &mut recorder,
  );

  assert_eq!(recorder.order, vec!["App.X", "App.Y", "App.Root"]);
}

#[test]
fn desired_walk_cuts_cyclic_declarations() {
  let store = InMemoryStore::default()
    .with_app(FixtureApp::new("App.A").with_declaration(dependency("b", "App.B")))
    .with_app(FixtureApp::new("App.B").with_declaration(dependency("a", "App.A")));

  let mut recorder = DesiredRecorder::default();
  walk_desired(
    &store,
    store.app("App.A"),
    root_config("App.A"),
    ConfigurationTarget::Update,
    Language::En,
    &mut recorder,
  );

  assert_eq!(recorder.order, vec!["App.B", "App.A"]);
}

#[test]
fn desired_walk_enters_a_specific_instance_only_once() {
  let meter = make_instance("App.Meter", "Meter", &[]);
  let store = InMemoryStore::default()
    .with_app(
      FixtureApp::new("App.Root")
        .with_declaration(DependencyDeclaration::new(
          "first",
          vec![AppDependencyConfig::for_instance(meter.instance_id)],
        ))
        .with_declaration(DependencyDeclaration::new(
          "second",
          vec![AppDependencyConfig::for_instance(meter.instance_id)],
        )),
    )
    .with_app(FixtureApp::new("App.Meter"));

  let mut recorder = DesiredRecorder {
    instances: vec![meter],
    ..Default::default()
  };
  walk_desired(
    &store,
    store.app("App.Root"),
    root_config("App.Root"),
    ConfigurationTarget::Update,
    Language::En,
    &mut recorder,
  );

  assert_eq!(recorder.order, vec!["App.Meter", "App.Root"]);
}

#[test]
fn desired_walk_skips_unrenderable_subtree() {
  let mut broken = FixtureApp::new("App.B");
  broken.fail_render = true;
  let store = InMemoryStore::default()
    .with_app(FixtureApp::new("App.A").with_declaration(dependency("b", "App.B")))
    .with_app(broken);

  let mut recorder = DesiredRecorder::default();
  walk_desired(
    &store,
    store.app("App.A"),
    root_config("App.A"),
    ConfigurationTarget::Update,
    Language::En,
    &mut recorder,
  );

  assert_eq!(recorder.order, vec!["App.A"]);
  assert_eq!(recorder.failures, 1);
}

#[test]
fn existing_walk_delivers_children_before_parents() {
  let store = InMemoryStore::default()
    .with_app(FixtureApp::new("App.BatteryMonitor").with_declaration(dependency("meter", "App.Meter")))
    .with_app(FixtureApp::new("App.Meter"));

  let meter = make_instance("App.Meter", "meter", &[]);
  let mut monitor = make_instance("App.BatteryMonitor", "monitor", &[]);
  monitor.dependencies.push(Dependency::new("meter", meter.instance_id));
  store.add_instance(meter);
  store.add_instance(monitor.clone());

  let mut recorder = ExistingRecorder::default();
  let root = walk_existing(&store, monitor, ConfigurationTarget::Update, Language::En, &mut recorder).unwrap();

  assert_eq!(recorder.order, vec!["meter", "monitor"]);
  let root = root.unwrap();
  assert!(root.declaration.is_none());
  assert!(root.parent_instance.is_none());
}

#[test]
fn existing_walk_gate_skips_subtree() {
  let store = InMemoryStore::default()
    .with_app(FixtureApp::new("App.BatteryMonitor").with_declaration(dependency("meter", "App.Meter")))
    .with_app(FixtureApp::new("App.Meter"));

  let meter = make_instance("App.Meter", "meter", &[]);
  let mut monitor = make_instance("App.BatteryMonitor", "monitor", &[]);
  monitor.dependencies.push(Dependency::new("meter", meter.instance_id));
  store.add_instance(meter.clone());
  store.add_instance(monitor.clone());

  let mut recorder = ExistingRecorder {
    skip: Some(meter.instance_id),
    ..Default::default()
  };
  walk_existing(&store, monitor, ConfigurationTarget::Update, Language::En, &mut recorder).unwrap();

  assert_eq!(recorder.order, vec!["monitor"]);
}

#[test]
fn existing_walk_skips_dangling_edges() {
  let store = InMemoryStore::default()
    .with_app(FixtureApp::new("App.BatteryMonitor").with_declaration(dependency("meter", "App.Meter")));

  let mut monitor = make_instance("App.BatteryMonitor", "monitor", &[]);
  monitor.dependencies.push(Dependency::new("meter", InstanceId::random()));
  store.add_instance(monitor.clone());

  let mut recorder = ExistingRecorder::default();
  walk_existing(&store, monitor, ConfigurationTarget::Update, Language::En, &mut recorder).unwrap();

  assert_eq!(recorder.order, vec!["monitor"]);
}

#[test]
fn existing_walk_fails_for_unknown_root_app() {
  let store = InMemoryStore::default();
  let orphan = make_instance("App.Unknown", "orphan", &[]);

  let mut recorder = ExistingRecorder::default();
  let err = walk_existing(&store, orphan, ConfigurationTarget::Update, Language::En, &mut recorder).unwrap_err();

  assert!(matches!(err, WalkError::AppNotFound(_)));
}

#[test]
fn existing_walk_breaks_reference_cycles() {
  let store = InMemoryStore::default()
    .with_app(FixtureApp::new("App.A").with_declaration(dependency("b", "App.B")))
    .with_app(FixtureApp::new("App.B").with_declaration(dependency("a", "App.A")));

  let mut a = make_instance("App.A", "a", &[]);
  let mut b = make_instance("App.B", "b", &[]);
  let (id_a, id_b) = (a.instance_id, b.instance_id);
  a.dependencies.push(Dependency::new("b", id_b));
  b.dependencies.push(Dependency::new("a", id_a));
  store.add_instance(a.clone());
  store.add_instance(b);

  let mut recorder = ExistingRecorder::default();
  walk_existing(&store, a, ConfigurationTarget::Update, Language::En, &mut recorder).unwrap();

  assert_eq!(recorder.order, vec!["b", "a"]);
}
