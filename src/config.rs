use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::i18n::LocaleDescriptor;

/// Runtime environment, used to decide whether lookups may be cached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Local,
}

impl Environment {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Local,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub database_url: String,

    // Translation files
    pub lang_path: PathBuf,
    pub scan_paths: Vec<PathBuf>,
    pub upload_dir: PathBuf,

    // Locales
    pub locales: Vec<LocaleDescriptor>,
    pub base_locale: String,
    pub fallback_locale: String,

    // Server
    pub environment: Environment,
    pub port: u16,
    pub api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let locales = match std::env::var("TRANSLATION_LOCALES") {
            Ok(raw) => parse_locales(&raw).context("Invalid TRANSLATION_LOCALES")?,
            Err(_) => default_locales(),
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://storage/translations.db".to_string()),

            lang_path: std::env::var("LANG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("lang")),
            scan_paths: std::env::var("SCAN_PATHS")
                .map(|v| parse_path_list(&v))
                .unwrap_or_else(|_| {
                    ["app", "resources/views", "routes"]
                        .iter()
                        .map(PathBuf::from)
                        .collect()
                }),
            upload_dir: std::env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("storage/tmp/translation-imports")),

            locales,
            base_locale: std::env::var("BASE_LOCALE").unwrap_or_else(|_| "en".to_string()),
            fallback_locale: std::env::var("FALLBACK_LOCALE")
                .unwrap_or_else(|_| "en".to_string()),

            environment: Environment::from_name(
                &std::env::var("APP_ENV").unwrap_or_else(|_| "production".to_string()),
            ),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            api_key: std::env::var("API_KEY").ok().filter(|v| !v.is_empty()),
        })
    }
}

static LOCALE_CODE_REGEX: OnceLock<Regex> = OnceLock::new();

/// Whether `code` looks like a locale tag (`en`, `pt_BR`, `zh-Hant`)
pub fn is_valid_locale_code(code: &str) -> bool {
    LOCALE_CODE_REGEX
        .get_or_init(|| Regex::new(r"^[A-Za-z]{2,3}(?:[_-][A-Za-z0-9]{2,8})*$").unwrap())
        .is_match(code)
}

/// Locales used when nothing is configured
pub fn default_locales() -> Vec<LocaleDescriptor> {
    vec![LocaleDescriptor::new("en", "English", "gb")]
}

/// Parse `code:name:flag` entries separated by commas.
///
/// `name` and `flag` are optional; a missing name falls back to the code and a
/// missing flag to an empty string. An empty value yields an empty list, which
/// callers treat as "no locales configured".
pub fn parse_locales(raw: &str) -> Result<Vec<LocaleDescriptor>> {
    let mut locales: Vec<LocaleDescriptor> = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.split(':').map(str::trim);
        let code = parts.next().unwrap_or_default();
        if code.is_empty() {
            bail!("Locale entry '{}' has no code", entry);
        }
        if !is_valid_locale_code(code) {
            bail!("Locale code '{}' is not a valid locale tag", code);
        }
        let name = parts.next().filter(|n| !n.is_empty()).unwrap_or(code);
        let flag = parts.next().unwrap_or_default();
        if parts.next().is_some() {
            bail!("Locale entry '{}' has too many fields (expected code:name:flag)", entry);
        }
        if locales.iter().any(|l| l.code == code) {
            bail!("Locale '{}' is configured more than once", code);
        }
        locales.push(LocaleDescriptor::new(code, name, flag));
    }

    Ok(locales)
}

fn parse_path_list(raw: &str) -> Vec<PathBuf> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "LANG_PATH",
        "SCAN_PATHS",
        "UPLOAD_DIR",
        "TRANSLATION_LOCALES",
        "BASE_LOCALE",
        "FALLBACK_LOCALE",
        "APP_ENV",
        "PORT",
        "API_KEY",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    // ==================== parse_locales Tests ====================

    #[test]
    fn test_parse_locales_full_entries() {
        let locales = parse_locales("en:English:gb, uk:Ukrainian:ua,pl:Polish:pl").unwrap();

        assert_eq!(locales.len(), 3);
        assert_eq!(locales[0], LocaleDescriptor::new("en", "English", "gb"));
        assert_eq!(locales[1], LocaleDescriptor::new("uk", "Ukrainian", "ua"));
        assert_eq!(locales[2].code, "pl");
    }

    #[test]
    fn test_parse_locales_optional_fields() {
        let locales = parse_locales("en,de:Deutsch").unwrap();

        assert_eq!(locales[0], LocaleDescriptor::new("en", "en", ""));
        assert_eq!(locales[1], LocaleDescriptor::new("de", "Deutsch", ""));
    }

    #[test]
    fn test_parse_locales_empty_value() {
        assert!(parse_locales("").unwrap().is_empty());
        assert!(parse_locales(" , ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_locales_rejects_duplicates() {
        let err = parse_locales("en:English,en:Other").unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_parse_locales_rejects_extra_fields() {
        assert!(parse_locales("en:English:gb:extra").is_err());
        assert!(parse_locales(":English").is_err());
    }

    #[test]
    fn test_locale_code_validation() {
        assert!(is_valid_locale_code("en"));
        assert!(is_valid_locale_code("pt_BR"));
        assert!(is_valid_locale_code("zh-Hant-TW"));
        assert!(!is_valid_locale_code("e"));
        assert!(!is_valid_locale_code("en;Path=/"));
        assert!(!is_valid_locale_code("../etc"));
        assert!(parse_locales("en:English,bad code").is_err());
    }

    // ==================== Environment Tests ====================

    #[test]
    fn test_environment_from_name() {
        assert_eq!(Environment::from_name("production"), Environment::Production);
        assert_eq!(Environment::from_name("PROD"), Environment::Production);
        assert_eq!(Environment::from_name("local"), Environment::Local);
        assert_eq!(Environment::from_name("testing"), Environment::Local);
    }

    // ==================== from_env Tests ====================

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();

        let config = Config::from_env().expect("defaults should load");

        assert_eq!(config.database_url, "sqlite://storage/translations.db");
        assert_eq!(config.lang_path, PathBuf::from("lang"));
        assert_eq!(config.scan_paths.len(), 3);
        assert_eq!(config.locales, default_locales());
        assert_eq!(config.base_locale, "en");
        assert_eq!(config.fallback_locale, "en");
        assert!(config.environment.is_production());
        assert_eq!(config.port, 8080);
        assert!(config.api_key.is_none());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("TRANSLATION_LOCALES", "en:English:gb,uk:Ukrainian:ua");
        std::env::set_var("SCAN_PATHS", "src, templates");
        std::env::set_var("APP_ENV", "local");
        std::env::set_var("PORT", "not-a-number");
        std::env::set_var("API_KEY", "");

        let config = Config::from_env().expect("config should load");

        assert_eq!(config.locales.len(), 2);
        assert_eq!(
            config.scan_paths,
            vec![PathBuf::from("src"), PathBuf::from("templates")]
        );
        assert_eq!(config.environment, Environment::Local);
        assert_eq!(config.port, 8080);
        assert!(config.api_key.is_none(), "empty API_KEY leaves no admin key, so admin routes refuse every request");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_locales() {
        clear_env();
        std::env::set_var("TRANSLATION_LOCALES", "en,en");

        let result = Config::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("TRANSLATION_LOCALES"));

        clear_env();
    }
}
