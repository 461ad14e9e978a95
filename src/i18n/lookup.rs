//! Key resolution against grouped translation files.
//!
//! A key such as `auth.failed` resolves when `lang/<locale>/auth.php` contains
//! the path `failed`. When the requested locale does not have it, the fallback
//! locale is consulted. The locale is always an explicit argument; nothing
//! here depends on a process-wide "current locale".

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::php_array::parse_return_array;

pub struct GroupFileLookup {
    lang_path: PathBuf,
    fallback_locale: String,
    cache: HashMap<(String, String), Option<Map<String, Value>>>,
}

impl GroupFileLookup {
    pub fn new(lang_path: impl Into<PathBuf>, fallback_locale: &str) -> Self {
        Self {
            lang_path: lang_path.into(),
            fallback_locale: fallback_locale.to_string(),
            cache: HashMap::new(),
        }
    }

    /// Whether `key` already resolves through a group file for `locale`.
    pub fn resolves(&mut self, key: &str, locale: &str) -> Result<bool> {
        let (group, item) = match key.split_once('.') {
            Some((group, item)) => (group, Some(item)),
            None => (key, None),
        };
        if group.is_empty() {
            return Ok(false);
        }

        let mut locales = vec![locale.to_string()];
        if self.fallback_locale != locale {
            locales.push(self.fallback_locale.clone());
        }

        for candidate in locales {
            let Some(array) = self.load(&candidate, group)? else {
                continue;
            };
            let found = match item {
                // A bare group name resolves to the whole file
                None => true,
                Some(path) => lookup_path(array, path).is_some(),
            };
            if found {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn load(&mut self, locale: &str, group: &str) -> Result<Option<&Map<String, Value>>> {
        let cache_key = (locale.to_string(), group.to_string());

        if !self.cache.contains_key(&cache_key) {
            let path = self.lang_path.join(locale).join(format!("{group}.php"));
            let array = if path.is_file() {
                let source = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let array = parse_return_array(&source)
                    .with_context(|| format!("Failed to parse {}", path.display()))?;
                Some(array)
            } else {
                None
            };
            self.cache.insert(cache_key.clone(), array);
        }

        Ok(self.cache.get(&cache_key).and_then(Option::as_ref))
    }
}

/// Follow a dotted path through nested arrays.
fn lookup_path<'a>(array: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    // Keys containing dots are matched whole before being split
    if let Some(value) = array.get(path) {
        return Some(value);
    }

    let (head, rest) = path.split_once('.')?;
    match array.get(head)? {
        Value::Object(child) => lookup_path(child, rest),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lang_tree() -> TempDir {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let en = temp_dir.path().join("en");
        let uk = temp_dir.path().join("uk");
        std::fs::create_dir_all(&en).unwrap();
        std::fs::create_dir_all(&uk).unwrap();

        std::fs::write(
            en.join("auth.php"),
            "<?php return ['failed' => 'These credentials do not match our records.', 'throttle' => 'Too many attempts.'];",
        )
        .unwrap();
        std::fs::write(
            en.join("validation.php"),
            "<?php return ['between' => ['numeric' => 'Between :min and :max.'], 'custom.rule' => 'Dotted'];",
        )
        .unwrap();
        std::fs::write(uk.join("auth.php"), "<?php return ['failed' => 'Невірні дані.'];").unwrap();
        temp_dir
    }

    #[test]
    fn test_resolves_key_in_locale_group_file() {
        let dir = lang_tree();
        let mut lookup = GroupFileLookup::new(dir.path(), "en");

        assert!(lookup.resolves("auth.failed", "uk").unwrap());
        assert!(lookup.resolves("auth.failed", "en").unwrap());
    }

    #[test]
    fn test_falls_back_to_fallback_locale() {
        let dir = lang_tree();
        let mut lookup = GroupFileLookup::new(dir.path(), "en");

        assert!(lookup.resolves("auth.throttle", "uk").unwrap());
        assert!(lookup.resolves("validation.between.numeric", "pl").unwrap());
    }

    #[test]
    fn test_nested_and_dotted_paths() {
        let dir = lang_tree();
        let mut lookup = GroupFileLookup::new(dir.path(), "en");

        assert!(lookup.resolves("validation.between", "en").unwrap());
        assert!(lookup.resolves("validation.custom.rule", "en").unwrap());
        assert!(!lookup.resolves("validation.between.string", "en").unwrap());
    }

    #[test]
    fn test_plain_sentences_do_not_resolve() {
        let dir = lang_tree();
        let mut lookup = GroupFileLookup::new(dir.path(), "en");

        assert!(!lookup.resolves("Simple message", "en").unwrap());
        assert!(!lookup.resolves("Please try again.", "uk").unwrap());
        assert!(!lookup.resolves(".hidden", "en").unwrap());
    }

    #[test]
    fn test_bare_group_name_resolves_when_file_exists() {
        let dir = lang_tree();
        let mut lookup = GroupFileLookup::new(dir.path(), "en");

        assert!(lookup.resolves("auth", "en").unwrap());
        assert!(!lookup.resolves("pagination", "en").unwrap());
    }

    #[test]
    fn test_invalid_group_file_is_an_error() {
        let dir = lang_tree();
        std::fs::write(dir.path().join("en/broken.php"), "<?php return config('x');").unwrap();
        let mut lookup = GroupFileLookup::new(dir.path(), "en");

        let err = lookup.resolves("broken.key", "en").unwrap_err();
        assert!(format!("{:#}", err).contains("broken.php"));
    }
}
