//! Users and locale selection.

use serde::{Deserialize, Serialize};

/// Display language for rendered names and messages.
///
/// Locales without a translation table fall back to English.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
  #[default]
  En,
  De,
  Cz,
  Es,
  Fr,
  Nl,
}

impl Language {
  /// The language actually used for lookups; untranslated locales map to English.
  pub fn effective(self) -> Language {
    match self {
      Language::En | Language::De => self,
      Language::Cz | Language::Es | Language::Fr | Language::Nl => Language::En,
    }
  }
}

/// The requesting user. The id is opaque to the planner; only the
/// language is interpreted, for message and name localization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id: String,
  pub language: Language,
}

impl User {
  pub fn new(id: impl Into<String>, language: Language) -> Self {
    Self { id: id.into(), language }
  }
}
