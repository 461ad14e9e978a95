//! Writes translation files to the `lang/` directory.
//!
//! Two modes:
//! - `generate` seeds `lang/<locale>.json` with keys found in source code
//! - `publish` renders the translation store into JSON and grouped PHP files

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::db::{is_general_group, is_valid_group_name, Database, LocaleEntry};
use crate::i18n::{GroupFileLookup, LocaleRegistry};
use crate::php_array::render_return_array;

/// Framework translation files copied into every locale directory
pub const STANDARD_FILES: &[&str] = &["auth.php", "pagination.php", "passwords.php", "validation.php"];

/// Result of `generate` for one locale
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedLocale {
    pub locale: String,
    pub new_keys: usize,
    pub copied_files: Vec<String>,
}

/// Result of `publish` for one locale
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedLocale {
    pub locale: String,
    pub files: Vec<PathBuf>,
}

pub struct Materializer<'a> {
    lang_path: &'a Path,
    registry: &'a LocaleRegistry,
    base_locale: &'a str,
    fallback_locale: &'a str,
}

impl<'a> Materializer<'a> {
    pub fn new(lang_path: &'a Path, registry: &'a LocaleRegistry, base_locale: &'a str) -> Self {
        Self {
            lang_path,
            registry,
            base_locale,
            fallback_locale: base_locale,
        }
    }

    /// Locale consulted when a group file is missing a key for the target locale.
    pub fn with_fallback_locale(mut self, fallback_locale: &'a str) -> Self {
        self.fallback_locale = fallback_locale;
        self
    }

    /// Seed every locale's JSON file with the scanned keys.
    ///
    /// Existing entries are never changed. Keys that already resolve through
    /// a group file (e.g. `auth.failed`) are not added.
    pub fn generate(&self, keys: &BTreeSet<String>) -> Result<Vec<GeneratedLocale>> {
        if self.registry.is_empty() {
            bail!("No locales configured, set TRANSLATION_LOCALES");
        }

        let mut lookup = GroupFileLookup::new(self.lang_path, self.fallback_locale);
        let mut results = Vec::with_capacity(self.registry.len());

        for locale in self.registry.codes() {
            info!(locale = %locale, "Processing locale");

            let locale_dir = self.lang_path.join(&locale);
            std::fs::create_dir_all(&locale_dir)
                .with_context(|| format!("Failed to create {}", locale_dir.display()))?;

            let copied_files = self.copy_standard_files(&locale)?;
            let new_keys = self.update_json_file(&locale, keys, &mut lookup)?;

            if new_keys > 0 {
                info!("Added {} new keys to {}.json", new_keys, locale);
            }

            results.push(GeneratedLocale {
                locale,
                new_keys,
                copied_files,
            });
        }

        Ok(results)
    }

    fn copy_standard_files(&self, locale: &str) -> Result<Vec<String>> {
        let source_dir = self.lang_path.join(self.base_locale);
        let target_dir = self.lang_path.join(locale);
        let mut copied = Vec::new();

        for file in STANDARD_FILES {
            let source = source_dir.join(file);
            let target = target_dir.join(file);

            if source.is_file() && !target.exists() {
                std::fs::copy(&source, &target).with_context(|| {
                    format!("Failed to copy {} to {}", source.display(), target.display())
                })?;
                debug!(file = %target.display(), "Copied standard translation file");
                copied.push(file.to_string());
            }
        }

        Ok(copied)
    }

    fn update_json_file(
        &self,
        locale: &str,
        keys: &BTreeSet<String>,
        lookup: &mut GroupFileLookup,
    ) -> Result<usize> {
        let json_path = self.lang_path.join(format!("{locale}.json"));
        let mut translations: BTreeMap<String, Value> =
            read_json_object(&json_path)?.unwrap_or_default();
        let mut added = 0;

        for key in keys {
            if translations.contains_key(key) {
                continue;
            }
            if lookup.resolves(key, locale)? {
                debug!(key = %key, locale = %locale, "Key served by a group file, skipping");
                continue;
            }

            let value = if locale == self.base_locale {
                key.clone()
            } else {
                String::new()
            };
            translations.insert(key.clone(), Value::String(value));
            added += 1;
        }

        write_pretty_json(&json_path, &translations)?;
        Ok(added)
    }

    /// Render the store into `lang/<locale>.json` and `lang/<locale>/<group>.php`.
    ///
    /// Locales without any stored value are skipped and their files left as is.
    pub async fn publish(&self, db: &Database) -> Result<Vec<PublishedLocale>> {
        let mut results = Vec::new();

        for locale in self.registry.codes() {
            let entries = db.entries_for_locale(&locale).await?;
            if entries.is_empty() {
                warn!(locale = %locale, "No stored translations, skipping locale");
                continue;
            }

            let files = self.publish_locale(&locale, entries)?;
            results.push(PublishedLocale { locale, files });
        }

        Ok(results)
    }

    fn publish_locale(&self, locale: &str, entries: Vec<LocaleEntry>) -> Result<Vec<PathBuf>> {
        let locale_dir = self.lang_path.join(locale);
        std::fs::create_dir_all(&locale_dir)
            .with_context(|| format!("Failed to create {}", locale_dir.display()))?;

        let mut files = Vec::new();
        for (group, items) in group_entries(entries) {
            let path = match group {
                None => {
                    let path = self.lang_path.join(format!("{locale}.json"));
                    write_pretty_json(&path, &items)?;
                    path
                }
                Some(group) => {
                    if !is_valid_group_name(&group) {
                        bail!("Refusing to publish group {:?} for {}: not a file name", group, locale);
                    }
                    let path = locale_dir.join(format!("{group}.php"));
                    let nested = build_nested(&items);
                    std::fs::write(&path, render_return_array(&nested))
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    path
                }
            };
            debug!(file = %path.display(), keys = items.len(), "Published translations");
            files.push(path);
        }

        Ok(files)
    }
}

/// Group entries by file, in first-appearance order. `None` is the flat JSON
/// group.
fn group_entries(entries: Vec<LocaleEntry>) -> Vec<(Option<String>, Map<String, Value>)> {
    let mut groups: Vec<(Option<String>, Map<String, Value>)> = Vec::new();

    for entry in entries {
        let group = if is_general_group(entry.group.as_deref()) {
            None
        } else {
            entry.group
        };

        let items = match groups.iter().position(|(g, _)| *g == group) {
            Some(index) => &mut groups[index].1,
            None => {
                groups.push((group, Map::new()));
                let last = groups.len() - 1;
                &mut groups[last].1
            }
        };
        items.insert(entry.key, Value::String(entry.value));
    }

    groups
}

/// Expand dotted keys into nested arrays, preserving first-appearance order.
///
/// When a key is both a value and a prefix of another key, the later entry
/// replaces the earlier one.
pub fn build_nested(flat: &Map<String, Value>) -> Map<String, Value> {
    let mut nested = Map::new();
    for (key, value) in flat {
        let segments: Vec<&str> = key.split('.').collect();
        insert_path(&mut nested, &segments, value.clone());
    }
    nested
}

fn insert_path(map: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [leaf] => {
            map.insert(leaf.to_string(), value);
        }
        [head, rest @ ..] => {
            let slot = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                debug!(segment = %head, "Replacing a value with a nested group");
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(child) = slot {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Read a JSON object file; `None` when the file does not exist.
pub fn read_json_object<T>(path: &Path) -> Result<Option<T>>
where
    T: serde::de::DeserializeOwned,
{
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(None);
    }

    let mut parsed: Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    // An empty PHP array encodes as `[]`
    if parsed.as_array().is_some_and(Vec::is_empty) {
        parsed = Value::Object(Map::new());
    }

    let object = serde_json::from_value(parsed)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(Some(object))
}

/// Write JSON with 4-space indentation and unescaped Unicode.
pub fn write_pretty_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut serializer)
        .with_context(|| format!("Failed to encode {}", path.display()))?;

    std::fs::write(path, buf).with_context(|| format!("Failed to write {}", path.display()))
}
