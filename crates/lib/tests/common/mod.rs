//! Shared in-memory fixtures for the integration tests: a catalog of
//! declarative apps, an instance store, a component registry, and
//! recording aggregators.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::{Value, json};

use edgeapps::aggregate::{AggregateError, Aggregator, AggregatorSet};
use edgeapps::component::ComponentRegistry;
use edgeapps::planner::UpdateValues;
use edgeapps::store::AppStore;
use edgeapps_core::{
  App, AppConfiguration, AppId, AppInstance, ComponentConfig, ConfigurationTarget, DependencyDeclaration,
  InstanceId, InterfaceConfiguration, Language, Properties, PropertyDescriptor, RenderError, ValidatorConfig,
};

/// Where a fixture component takes its id from.
#[derive(Debug, Clone)]
pub enum IdSource {
  Fixed(String),
  /// Property-driven id with a default, following the `Target::Test`
  /// render contract.
  Property { key: String, default: String },
}

#[derive(Debug, Clone)]
pub struct ComponentTemplate {
  pub id: IdSource,
  pub alias: String,
  pub factory_id: String,
  /// Instance properties copied onto the rendered component.
  pub copy_properties: Vec<String>,
}

impl ComponentTemplate {
  pub fn fixed(id: &str, factory_id: &str) -> Self {
    Self {
      id: IdSource::Fixed(id.to_string()),
      alias: id.to_string(),
      factory_id: factory_id.to_string(),
      copy_properties: Vec::new(),
    }
  }

  pub fn from_property(key: &str, default: &str, factory_id: &str) -> Self {
    Self {
      id: IdSource::Property {
        key: key.to_string(),
        default: default.to_string(),
      },
      alias: default.to_string(),
      factory_id: factory_id.to_string(),
      copy_properties: Vec::new(),
    }
  }

  pub fn copying(mut self, properties: &[&str]) -> Self {
    self.copy_properties = properties.iter().map(|p| p.to_string()).collect();
    self
  }
}

/// Declarative catalog app for tests.
pub struct FixtureApp {
  pub id: AppId,
  pub display_name: String,
  pub declarations: Vec<DependencyDeclaration>,
  pub descriptors: Vec<PropertyDescriptor>,
  pub components: Vec<ComponentTemplate>,
  pub ips: Vec<InterfaceConfiguration>,
  pub fail_render: bool,
}

impl FixtureApp {
  pub fn new(id: &str) -> Self {
    Self {
      id: AppId::new(id),
      display_name: id.to_string(),
      declarations: Vec::new(),
      descriptors: Vec::new(),
      components: Vec::new(),
      ips: Vec::new(),
      fail_render: false,
    }
  }

  pub fn with_declaration(mut self, declaration: DependencyDeclaration) -> Self {
    self.declarations.push(declaration);
    self
  }

  pub fn with_component(mut self, component: ComponentTemplate) -> Self {
    self.components.push(component);
    self
  }

  pub fn with_descriptor(mut self, descriptor: PropertyDescriptor) -> Self {
    self.descriptors.push(descriptor);
    self
  }

  fn component_id(&self, template: &ComponentTemplate, target: ConfigurationTarget, properties: &Properties) -> String {
    match &template.id {
      IdSource::Fixed(id) => id.clone(),
      IdSource::Property { key, default } => {
        let value = properties.get(key).and_then(Value::as_str);
        match target {
          ConfigurationTarget::Test => match value {
            Some(value) => format!("{value}:{default}"),
            None => format!("{key}:{default}"),
          },
          _ => value.unwrap_or(default).to_string(),
        }
      }
    }
  }
}

impl App for FixtureApp {
  fn app_id(&self) -> &AppId {
    &self.id
  }

  fn name(&self, _language: Language) -> String {
    self.display_name.clone()
  }

  fn render(
    &self,
    target: ConfigurationTarget,
    _alias: Option<&str>,
    properties: &Properties,
    _language: Language,
  ) -> Result<AppConfiguration, RenderError> {
    if self.fail_render {
      return Err(RenderError::new("fixture render failure"));
    }

    let mut components = Vec::new();
    for template in &self.components {
      let mut component = ComponentConfig::new(
        self.component_id(template, target, properties),
        template.alias.clone(),
        template.factory_id.clone(),
      );
      for key in &template.copy_properties {
        if let Some(value) = properties.get(key) {
          component.properties.insert(key.clone(), value.clone());
        }
      }
      components.push(component);
    }

    Ok(AppConfiguration {
      scheduler_execution_order: components.iter().map(|c| c.id.clone()).collect(),
      components,
      ips: self.ips.clone(),
      dependencies: self.declarations.clone(),
    })
  }

  fn properties(&self) -> Vec<PropertyDescriptor> {
    self.descriptors.clone()
  }

  fn validator_config(&self) -> ValidatorConfig {
    ValidatorConfig::default()
  }
}

/// Catalog plus live instance set, mutable between requests.
#[derive(Default)]
pub struct InMemoryStore {
  apps: HashMap<AppId, Arc<FixtureApp>>,
  instances: RefCell<Vec<AppInstance>>,
}

impl InMemoryStore {
  pub fn with_app(mut self, app: FixtureApp) -> Self {
    self.apps.insert(app.id.clone(), Arc::new(app));
    self
  }

  pub fn app(&self, id: &str) -> Arc<dyn App> {
    self.apps[&AppId::new(id)].clone()
  }

  pub fn add_instance(&self, instance: AppInstance) {
    self.instances.borrow_mut().push(instance);
  }

  /// Applies a committed plan to the live set, as the surrounding
  /// service would after a successful request.
  pub fn apply(&self, values: &UpdateValues) {
    let mut instances = self.instances.borrow_mut();
    instances.retain(|i| !values.deleted.iter().any(|d| d.instance_id == i.instance_id));
    for changed in &values.created_or_modified {
      instances.retain(|i| i.instance_id != changed.instance_id);
      instances.push(changed.clone());
    }
  }

  pub fn live(&self) -> Vec<AppInstance> {
    self.instances.borrow().clone()
  }
}

impl AppStore for InMemoryStore {
  fn app_by_id(&self, id: &AppId) -> Option<Arc<dyn App>> {
    self.apps.get(id).map(|app| app.clone() as Arc<dyn App>)
  }

  fn instance_by_id(&self, id: &InstanceId) -> Option<AppInstance> {
    self.instances.borrow().iter().find(|i| i.instance_id == *id).cloned()
  }

  fn instances(&self) -> Vec<AppInstance> {
    self.instances.borrow().clone()
  }
}

/// Live components on the simulated edge.
#[derive(Default)]
pub struct InMemoryRegistry {
  pub components: Vec<ComponentConfig>,
}

impl InMemoryRegistry {
  pub fn with_component(mut self, component: ComponentConfig) -> Self {
    self.components.push(component);
    self
  }
}

impl ComponentRegistry for InMemoryRegistry {
  fn component(&self, id: &str) -> Option<ComponentConfig> {
    self.components.iter().find(|c| c.id == id).cloned()
  }

  fn component_by_config(&self, component: &ComponentConfig) -> Option<ComponentConfig> {
    self.components.iter().find(|c| c.same_settings(component)).cloned()
  }
}

/// What one aggregator saw during a request.
#[derive(Default)]
pub struct AggregatorLog {
  pub aggregated: Vec<(Option<AppConfiguration>, Option<AppConfiguration>)>,
  pub commits: usize,
  pub resets: usize,
}

pub struct RecordingAggregator {
  pub log: Rc<RefCell<AggregatorLog>>,
  pub fail_commit: Option<String>,
}

impl Aggregator for RecordingAggregator {
  fn reset(&mut self) {
    let mut log = self.log.borrow_mut();
    log.resets += 1;
    log.aggregated.clear();
  }

  fn aggregate(&mut self, new_config: Option<&AppConfiguration>, old_config: Option<&AppConfiguration>) {
    self
      .log
      .borrow_mut()
      .aggregated
      .push((new_config.cloned(), old_config.cloned()));
  }

  fn commit(
    &mut self,
    _user: Option<&edgeapps_core::User>,
    _other_configs: &[AppConfiguration],
  ) -> Result<(), AggregateError> {
    if let Some(message) = &self.fail_commit {
      return Err(AggregateError::new(message.clone()));
    }
    self.log.borrow_mut().commits += 1;
    Ok(())
  }
}

/// The three recording aggregators plus handles on their logs.
pub struct Aggregators {
  pub set: AggregatorSet,
  pub components: Rc<RefCell<AggregatorLog>>,
  pub scheduler: Rc<RefCell<AggregatorLog>>,
  pub static_ips: Rc<RefCell<AggregatorLog>>,
}

pub fn recording_aggregators() -> Aggregators {
  recording_aggregators_failing(None)
}

/// Recording aggregators where the scheduler stage fails with the given
/// message.
pub fn recording_aggregators_failing(scheduler_failure: Option<&str>) -> Aggregators {
  let components = Rc::new(RefCell::new(AggregatorLog::default()));
  let scheduler = Rc::new(RefCell::new(AggregatorLog::default()));
  let static_ips = Rc::new(RefCell::new(AggregatorLog::default()));
  let set = AggregatorSet::new(
    Box::new(RecordingAggregator {
      log: components.clone(),
      fail_commit: None,
    }),
    Box::new(RecordingAggregator {
      log: scheduler.clone(),
      fail_commit: scheduler_failure.map(|m| m.to_string()),
    }),
    Box::new(RecordingAggregator {
      log: static_ips.clone(),
      fail_commit: None,
    }),
  );
  Aggregators {
    set,
    components,
    scheduler,
    static_ips,
  }
}

/// Instance of `app` with the given alias and string properties.
pub fn make_instance(app: &str, alias: &str, properties: &[(&str, &str)]) -> AppInstance {
  let mut map = Properties::new();
  for (key, value) in properties {
    map.insert((*key).to_string(), json!(value));
  }
  AppInstance::new(AppId::new(app), alias, map)
}
