//! The generate, import and publish operations, wired to configuration.
//!
//! Shared by the command line and the admin API. Concurrent generate or
//! publish runs against the same `lang/` tree are not coordinated; callers
//! run one at a time.

use anyhow::{bail, Result};
use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::i18n::LocaleRegistry;
use crate::importer::{ImportReport, Importer};
use crate::materializer::{GeneratedLocale, Materializer, PublishedLocale};
use crate::scanner;

/// Scan source directories and seed each locale's JSON file.
pub fn generate(config: &Config) -> Result<Vec<GeneratedLocale>> {
    let registry = LocaleRegistry::from_config(config);
    if registry.is_empty() {
        bail!("No locales configured, set TRANSLATION_LOCALES");
    }

    info!("Scanning {} source directories", config.scan_paths.len());
    let keys = scanner::scan_directories(&config.scan_paths)?;
    info!("Found {} translation keys", keys.len());

    Materializer::new(&config.lang_path, &registry, &config.base_locale)
        .with_fallback_locale(&config.fallback_locale)
        .generate(&keys)
}

/// Load `lang/` files into the store.
pub async fn import(config: &Config, db: &Database, force: bool) -> Result<ImportReport> {
    let registry = LocaleRegistry::from_config(config);
    Importer::new(db, &config.lang_path)
        .import_all(&registry, force)
        .await
}

/// Write the store out to `lang/`.
pub async fn publish(config: &Config, db: &Database) -> Result<Vec<PublishedLocale>> {
    let registry = LocaleRegistry::from_config(config);
    Materializer::new(&config.lang_path, &registry, &config.base_locale)
        .publish(db)
        .await
}
