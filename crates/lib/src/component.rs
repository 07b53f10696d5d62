//! The live component registry contract.
//!
//! Component ids follow the convention `base` + decimal suffix
//! (`meter0`, `ctrlBalancing1`). Core components without a numeric
//! suffix (`_power`, `_sum`) are never renumbered.

use edgeapps_core::ComponentConfig;

/// Read access to the components currently configured on the edge.
pub trait ComponentRegistry {
  /// The live component with the given id.
  fn component(&self, id: &str) -> Option<ComponentConfig>;

  /// A live component whose factory and properties equal `component`,
  /// regardless of its id.
  fn component_by_config(&self, component: &ComponentConfig) -> Option<ComponentConfig>;

  /// The smallest id `base{n}` with `n >= start` that is neither live
  /// nor in `claimed`.
  fn next_available_id(&self, base: &str, start: usize, claimed: &[String]) -> String {
    let mut n = start;
    loop {
      let id = format!("{base}{n}");
      if self.component(&id).is_none() && !claimed.iter().any(|c| c == &id) {
        return id;
      }
      n += 1;
    }
  }
}

/// Splits an id into its base name and trailing number, if numbered.
///
/// `meter12` → `("meter", 12)`; `_power` has no trailing digits and
/// yields `None`.
pub fn split_numbered_id(id: &str) -> Option<(&str, usize)> {
  let digits = id.len() - id.trim_end_matches(|c: char| c.is_ascii_digit()).len();
  if digits == 0 {
    return None;
  }
  let (base, suffix) = id.split_at(id.len() - digits);
  suffix.parse().ok().map(|n| (base, n))
}
