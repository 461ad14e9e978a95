//! Locale registry: the ordered list of locales the application translates into.
//!
//! The registry is built once from configuration and never mutated afterwards.
//! Its order is significant: it drives CSV column order and the order locales
//! are listed in the language switcher.

use serde::Serialize;

use crate::config::Config;

/// A configured locale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocaleDescriptor {
    /// Locale code used in file names and stored values (e.g., "en", "uk")
    pub code: String,

    /// Display name (e.g., "English", "Ukrainian")
    pub name: String,

    /// Flag identifier shown next to the name (e.g., "gb", "ua")
    pub flag: String,
}

impl LocaleDescriptor {
    pub fn new(code: &str, name: &str, flag: &str) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            flag: flag.to_string(),
        }
    }
}

/// Ordered, read-only set of configured locales.
#[derive(Debug, Clone, Default)]
pub struct LocaleRegistry {
    locales: Vec<LocaleDescriptor>,
}

impl LocaleRegistry {
    pub fn new(locales: Vec<LocaleDescriptor>) -> Self {
        Self { locales }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.locales.clone())
    }

    /// Get a locale by its code.
    pub fn get_by_code(&self, code: &str) -> Option<&LocaleDescriptor> {
        self.locales.iter().find(|locale| locale.code == code)
    }

    /// All locales in configured order.
    pub fn list(&self) -> &[LocaleDescriptor] {
        &self.locales
    }

    /// Locale codes in configured order.
    pub fn codes(&self) -> Vec<String> {
        self.locales.iter().map(|locale| locale.code.clone()).collect()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.get_by_code(code).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.locales.is_empty()
    }

    pub fn len(&self) -> usize {
        self.locales.len()
    }
}
