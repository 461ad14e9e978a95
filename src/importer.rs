//! Loads translation files from `lang/` into the translation store.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::db::{Database, MergeOutcome, StoreTransaction, GENERAL_GROUP};
use crate::i18n::LocaleRegistry;
use crate::materializer::read_json_object;
use crate::php_array::parse_return_array;

/// Counts for one imported locale
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocaleImport {
    pub locale: String,
    /// `(key, group)` pairs processed
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub locales: Vec<LocaleImport>,
    pub total: usize,
}

pub struct Importer<'a> {
    db: &'a Database,
    lang_path: &'a Path,
}

impl<'a> Importer<'a> {
    pub fn new(db: &'a Database, lang_path: &'a Path) -> Self {
        Self { db, lang_path }
    }

    /// Import every configured locale.
    ///
    /// With `force`, file values replace stored ones; otherwise only locales
    /// missing from a record are filled in.
    pub async fn import_all(&self, registry: &LocaleRegistry, force: bool) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        for locale in registry.codes() {
            let imported = self
                .import_locale(&locale, force)
                .await
                .with_context(|| format!("Failed to import locale {}", locale))?;

            info!(
                "Imported {} translations for {} ({} new, {} updated)",
                imported.processed, locale, imported.created, imported.updated
            );
            report.total += imported.processed;
            report.locales.push(imported);
        }

        Ok(report)
    }

    /// Import `lang/<locale>.json` and `lang/<locale>/*.php` in one transaction.
    pub async fn import_locale(&self, locale: &str, force: bool) -> Result<LocaleImport> {
        let mut sources: Vec<(String, Map<String, Value>)> = Vec::new();

        let json_path = self.lang_path.join(format!("{locale}.json"));
        if let Some(json) = read_json_object::<Map<String, Value>>(&json_path)? {
            sources.push((GENERAL_GROUP.to_string(), json));
        }

        for path in group_files(&self.lang_path.join(locale))? {
            let Some(group) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let array = parse_return_array(&source)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            sources.push((group.to_string(), array));
        }

        let mut result = LocaleImport {
            locale: locale.to_string(),
            ..Default::default()
        };
        let mut tx = self.db.begin().await?;

        for (group, array) in sources {
            let flat = flatten(&array);
            debug!(locale = %locale, group = %group, keys = flat.len(), "Importing group");
            for (key, value) in flat {
                merge_one(&mut tx, &mut result, &key, &group, locale, value, force).await?;
            }
        }

        tx.commit().await?;
        Ok(result)
    }
}

async fn merge_one(
    tx: &mut StoreTransaction,
    result: &mut LocaleImport,
    key: &str,
    group: &str,
    locale: &str,
    value: String,
    force: bool,
) -> Result<()> {
    let values = BTreeMap::from([(locale.to_string(), value)]);
    match tx.merge_values(key, Some(group), &values, force).await? {
        MergeOutcome::Created => result.created += 1,
        MergeOutcome::Updated => result.updated += 1,
        MergeOutcome::Unchanged => {}
    }
    result.processed += 1;
    Ok(())
}

/// `.php` files directly inside `dir`, sorted by name.
fn group_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "php") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Flatten nested arrays into dot-joined keys with string values.
pub fn flatten(array: &Map<String, Value>) -> Vec<(String, String)> {
    let mut out = Vec::new();
    flatten_into(array, "", &mut out);
    out
}

fn flatten_into(array: &Map<String, Value>, prefix: &str, out: &mut Vec<(String, String)>) {
    for (key, value) in array {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };

        match value {
            Value::Object(child) => flatten_into(child, &path, out),
            Value::Array(items) => {
                let indexed: Map<String, Value> = items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v.clone()))
                    .collect();
                flatten_into(&indexed, &path, out);
            }
            scalar => out.push((path, stringify(scalar))),
        }
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) | Value::Null => String::new(),
        other => other.to_string(),
    }
}
