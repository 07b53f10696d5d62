//! Component id reconciliation.
//!
//! Catalog apps template their component ids from instance properties
//! ("replaceable" slots). When a configuration is rendered for install
//! or update, every replaceable slot must end up with an id that
//! doesn't collide with live components, components of other instances
//! in the same request, or earlier slots of the same render, while ids
//! that are still valid are kept stable. The chosen ids are written
//! back into the instance properties so later renders agree.

use std::collections::{HashMap, HashSet};

use serde_json::json;
use tracing::{debug, warn};

use edgeapps_core::{App, AppConfiguration, AppInstance, ComponentConfig, ConfigurationTarget, Language, Properties, RenderError};

use crate::component::{ComponentRegistry, split_numbered_id};

/// Marker injected into probe renders to spot property-driven ids.
const PROBE_SENTINEL: &str = "?_?_";

/// One property-driven component id slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceableId {
  /// Property key holding the id.
  pub key: String,
  /// Id the app renders when the property is unset.
  pub default_id: String,
  /// Current value from the properties, or the default when unset.
  pub predefined_id: String,
}

/// Discovers the replaceable component id slots of an app.
///
/// Relies on the `Target::Test` render contract (see [`App`]): slot ids
/// render as `"<value>:<default>"` when the driving property is set and
/// `"<key>:<default>"` when unset.
pub fn replaceable_component_ids(
  app: &dyn App,
  properties: &Properties,
  language: Language,
) -> Result<Vec<ReplaceableId>, RenderError> {
  let probe = app.render(ConfigurationTarget::Test, None, properties, language)?;
  let mut copy = properties.clone();
  let mut default_to_current: HashMap<String, String> = HashMap::new();

  // Pass 1: spot slots whose property is already set and remember the
  // current id behind each default.
  for component in &probe.components {
    let mut set_key = None;
    for (key, value) in &copy {
      let Some(current) = value.as_str() else { continue };
      if !current.is_empty() && component.id.starts_with(current) {
        let default_id = match component.id.find(':') {
          Some(position) => component.id[position + 1..].to_string(),
          None => component.id.clone(),
        };
        default_to_current.insert(default_id, current.to_string());
        set_key = Some(key.clone());
        break;
      }
    }
    if let Some(key) = set_key {
      copy.remove(&key);
    }
  }

  // Pass 2: with the set properties removed every slot reads
  // "<key>:<default>"; plant a sentinel behind each candidate key.
  let cleared = app.render(ConfigurationTarget::Test, None, &copy, language)?;
  for component in &cleared.components {
    if let Some((key, _)) = component.id.split_once(':') {
      copy.insert(key.to_string(), json!(format!("{PROBE_SENTINEL}{key}")));
    }
  }

  // Pass 3: slots that picked up the sentinel are property-driven.
  let probed = app.render(ConfigurationTarget::Test, None, &copy, language)?;
  let mut seen = HashSet::new();
  let mut slots = Vec::new();
  for component in &probed.components {
    let Some(raw) = component.id.strip_prefix(PROBE_SENTINEL) else {
      continue;
    };
    let Some((key, default_id)) = raw.split_once(':') else {
      continue;
    };
    if !seen.insert(key.to_string()) {
      continue;
    }
    slots.push(ReplaceableId {
      key: key.to_string(),
      default_id: default_id.to_string(),
      predefined_id: default_to_current.get(default_id).cloned().unwrap_or_else(|| default_id.to_string()),
    });
  }
  Ok(slots)
}

/// Renders the instance's configuration with all replaceable component
/// ids resolved to final, non-colliding values.
///
/// Per replaceable slot, in order:
/// 1. a live component with identical settings is reused under its id;
/// 2. the id stored in the old instance's property is kept when its
///    factory still matches and no other instance claims it;
/// 3. the default id is used when nothing else occupies it;
/// 4. otherwise a fresh id is allocated from the numbered sequence.
///
/// Chosen ids are written back into `instance.properties`. Fixed-id
/// components are never rewritten; a collision there is logged and the
/// component is left for the aggregators to surface.
pub fn config_with_reconciled_ids(
  registry: &dyn ComponentRegistry,
  app: &dyn App,
  old_instance: Option<&AppInstance>,
  instance: &mut AppInstance,
  other_components: &[ComponentConfig],
  language: Language,
) -> Result<AppConfiguration, RenderError> {
  let target = match old_instance {
    Some(_) => ConfigurationTarget::Update,
    None => ConfigurationTarget::Add,
  };

  let slots = replaceable_component_ids(app, &instance.properties, language)?;

  // Render with per-slot index placeholders so each slot's component is
  // identifiable in the output regardless of the id it will get.
  let mut probe_properties = instance.properties.clone();
  let mut slot_by_placeholder: HashMap<String, &ReplaceableId> = HashMap::new();
  for (index, slot) in slots.iter().enumerate() {
    let placeholder = index.to_string();
    probe_properties.insert(slot.key.clone(), json!(placeholder));
    slot_by_placeholder.insert(placeholder, slot);
  }

  let rendered = app.render(target, Some(&instance.alias), &probe_properties, language)?;
  let mut components = rendered.components;

  for index in 0..components.len() {
    let component = components[index].clone();
    let slot = slot_by_placeholder.get(&component.id).copied();
    let original_id = slot.map(|s| s.predefined_id.clone()).unwrap_or_else(|| component.id.clone());
    let mut id = original_id.clone();
    let mut found = false;

    // An existing component with the exact settings wins; nothing new
    // gets created for it.
    if slot.is_some()
      && let Some(existing) = registry.component_by_config(&component)
    {
      id = existing.id;
      found = true;
    }

    // Keep the id recorded on the previous installation when possible.
    if !found
      && let (Some(slot), Some(old)) = (slot, old_instance)
      && let Some(previous) = old.properties.get(&slot.key).and_then(|v| v.as_str())
    {
      if let Some(existing) = registry.component(previous)
        && existing.factory_id == component.factory_id
        && !other_components.iter().any(|c| c.id == previous)
      {
        id = previous.to_string();
        found = true;
      }
    }

    if !found {
      let occupied =
        registry.component(&original_id).is_some() || other_components.iter().any(|c| c.id == original_id);
      let claimed_earlier = components[..index].iter().any(|c| c.id == original_id);

      let mut previously_used = false;
      let mut already_used_ids = Vec::new();
      if let (Some(slot), Some(old)) = (slot, old_instance) {
        for (key, value) in &old.properties {
          if *key == slot.key {
            continue;
          }
          let Some(used) = value.as_str() else { continue };
          already_used_ids.push(used.to_string());
          if used == original_id {
            previously_used = true;
          }
        }
      }

      if !occupied && !claimed_earlier && !previously_used {
        id = original_id.clone();
      } else {
        let base_id = slot.map(|s| s.default_id.clone()).unwrap_or_else(|| id.clone());
        match split_numbered_id(&base_id) {
          None => {
            // core component without a numeric suffix, keep as-is
            debug!(component = %base_id, "unnumbered component id left untouched");
          }
          Some((base, start)) => {
            let mut claimed: Vec<String> = components.iter().map(|c| c.id.clone()).collect();
            claimed.extend(already_used_ids);
            let next = registry.next_available_id(base, start, &claimed);
            if next != base_id && slot.is_none() {
              warn!(component = %component.id, "fixed component id is already in use");
              continue;
            }
            if slot.is_some() {
              id = next;
            }
          }
        }
      }
    }

    if let Some(slot) = slot {
      components[index].id = id.clone();
      instance.properties.insert(slot.key.clone(), json!(id));
    }
  }

  app.render(target, Some(&instance.alias), &instance.properties, language)
}
