//! Message localization.
//!
//! Warnings and failure messages are produced from keys so the
//! surrounding management service can surface them in the user's
//! language. Unknown keys fall back to the key itself so a missing
//! translation never hides a message entirely.

use edgeapps_core::Language;

/// Translates message keys for a user-facing locale.
pub trait Translator {
  fn translate(&self, language: Language, key: &str, args: &[&str]) -> String;
}

/// Built-in English and German tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTranslator;

impl Translator for DefaultTranslator {
  fn translate(&self, language: Language, key: &str, args: &[&str]) -> String {
    let template = match language.effective() {
      Language::De => german(key),
      _ => english(key),
    }
    .or_else(|| english(key));

    match template {
      Some(template) => fill(template, args),
      None => key.to_string(),
    }
  }
}

fn english(key: &str) -> Option<&'static str> {
  Some(match key {
    "appNotAllowedToBeUpdated" => "The app is not allowed to be updated.",
    "appNotAllowedToBeDeleted" => "The app is not allowed to be deleted.",
    "canNotChangeProperty" => "The property '{}' is set by another app and can not be changed.",
    "canNotChangeAlias" => "The alias is set by another app and can not be changed.",
    "overrideProperty" => "The property '{}' gets overridden by a depending app.",
    "canNotGetAppConfiguration" => "The app configuration could not be determined.",
    "canNotGetAppConfigurationOfApp" => "The configuration of app '{}' could not be determined.",
    "canNotUpdateComponents" => "The components could not be updated.",
    "canNotUpdateScheduler" => "The scheduler could not be updated.",
    "canNotUpdateStaticIps" => "The static addresses could not be updated.",
    _ => return None,
  })
}

fn german(key: &str) -> Option<&'static str> {
  Some(match key {
    "appNotAllowedToBeUpdated" => "Die App darf nicht aktualisiert werden.",
    "appNotAllowedToBeDeleted" => "Die App darf nicht gelöscht werden.",
    "canNotChangeProperty" => "Die Eigenschaft '{}' wird von einer anderen App gesetzt und kann nicht geändert werden.",
    "canNotChangeAlias" => "Der Alias wird von einer anderen App gesetzt und kann nicht geändert werden.",
    "overrideProperty" => "Die Eigenschaft '{}' wird von einer abhängigen App überschrieben.",
    "canNotGetAppConfiguration" => "Die App-Konfiguration konnte nicht ermittelt werden.",
    "canNotGetAppConfigurationOfApp" => "Die Konfiguration der App '{}' konnte nicht ermittelt werden.",
    "canNotUpdateComponents" => "Die Komponenten konnten nicht aktualisiert werden.",
    "canNotUpdateScheduler" => "Der Scheduler konnte nicht aktualisiert werden.",
    "canNotUpdateStaticIps" => "Die statischen Adressen konnten nicht aktualisiert werden.",
    _ => return None,
  })
}

/// Replaces `{}` markers in order; surplus markers stay as-is.
fn fill(template: &str, args: &[&str]) -> String {
  let mut out = template.to_string();
  for arg in args {
    if let Some(position) = out.find("{}") {
      out.replace_range(position..position + 2, arg);
    }
  }
  out
}
