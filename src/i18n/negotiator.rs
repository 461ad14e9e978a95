//! Per-request locale negotiation.
//!
//! The active locale comes from the session (the `locale` cookie) when set,
//! otherwise from the best `Accept-Language` match, otherwise the fallback
//! locale. A derived or corrected locale is written back to the session.

use axum::{
    extract::{Request, State},
    http::{
        header::{ACCEPT_LANGUAGE, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::registry::LocaleRegistry;
use crate::config::{Config, Environment};

/// Name of the cookie holding the session locale
pub const SESSION_COOKIE: &str = "locale";

/// How long the available-locale list is cached in production
pub const AVAILABLE_LOCALES_TTL: Duration = Duration::from_secs(60 * 60);

tokio::task_local! {
    static REQUEST_LOCALE: String;
}

/// Locale activated for the current request, inserted as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveLocale(pub String);

/// Outcome of negotiation for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    pub locale: String,
    /// New session value, when the session must be written
    pub session_update: Option<String>,
}

pub struct LocaleNegotiator {
    registry: LocaleRegistry,
    fallback_locale: String,
    environment: Environment,
    cache: RwLock<Option<(Instant, Vec<String>)>>,
}

impl LocaleNegotiator {
    pub fn new(registry: LocaleRegistry, fallback_locale: &str, environment: Environment) -> Self {
        Self {
            registry,
            fallback_locale: fallback_locale.to_string(),
            environment,
            cache: RwLock::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            LocaleRegistry::from_config(config),
            &config.fallback_locale,
            config.environment,
        )
    }

    pub fn registry(&self) -> &LocaleRegistry {
        &self.registry
    }

    pub fn fallback_locale(&self) -> &str {
        &self.fallback_locale
    }

    /// Available locale codes, cached for an hour in production only.
    pub async fn available_locales(&self) -> Vec<String> {
        if !self.environment.is_production() {
            return self.registry.codes();
        }

        if let Some((stored_at, codes)) = self.cache.read().await.as_ref() {
            if stored_at.elapsed() < AVAILABLE_LOCALES_TTL {
                return codes.clone();
            }
        }

        let codes = self.registry.codes();
        *self.cache.write().await = Some((Instant::now(), codes.clone()));
        debug!(locales = ?codes, "Cached available locales");
        codes
    }

    /// Contents of the available-locale cache, if populated.
    pub async fn cached_locales(&self) -> Option<Vec<String>> {
        self.cache.read().await.as_ref().map(|(_, codes)| codes.clone())
    }

    pub async fn is_available(&self, locale: &str) -> bool {
        self.available_locales().await.iter().any(|code| code == locale)
    }

    pub async fn negotiate(&self, session: Option<&str>, accept_language: Option<&str>) -> Negotiation {
        let available = self.available_locales().await;

        let (candidate, mut session_update) = match session.filter(|s| !s.is_empty()) {
            Some(locale) => (locale.to_string(), None),
            None => {
                let derived = accept_language
                    .and_then(|header| preferred_locale(header, &available))
                    .unwrap_or_else(|| self.fallback_locale.clone());
                (derived.clone(), Some(derived))
            }
        };

        let locale = if available.contains(&candidate) {
            candidate
        } else {
            debug!(candidate = %candidate, "Locale not available, using fallback");
            session_update = Some(self.fallback_locale.clone());
            self.fallback_locale.clone()
        };

        Negotiation {
            locale,
            session_update,
        }
    }
}

/// Best available locale for an `Accept-Language` header.
///
/// Tags are tried by descending quality; a tag with a region also tries its
/// primary subtag. Returns the available code as configured.
pub fn preferred_locale(header: &str, available: &[String]) -> Option<String> {
    let mut tags: Vec<(&str, f32)> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let tag = pieces.next()?.trim();
            if tag.is_empty() || tag == "*" {
                return None;
            }
            let quality = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (quality > 0.0).then_some((tag, quality))
        })
        .collect();

    // Stable sort keeps header order for equal weights
    tags.sort_by(|a, b| b.1.total_cmp(&a.1));

    for (tag, _) in tags {
        let primary = tag.split(['-', '_']).next().unwrap_or(tag);
        for candidate in [tag, primary] {
            if let Some(code) = available.iter().find(|code| same_tag(code, candidate)) {
                return Some(code.clone());
            }
        }
    }

    None
}

fn same_tag(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes().zip(b.bytes()).all(|(x, y)| {
            let normalize = |c: u8| if c == b'_' { b'-' } else { c.to_ascii_lowercase() };
            normalize(x) == normalize(y)
        })
}

/// Session locale from the request cookies.
pub fn session_locale(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
}

/// `Set-Cookie` value storing `locale` in the session.
pub fn session_cookie(locale: &str) -> Result<HeaderValue, axum::http::header::InvalidHeaderValue> {
    HeaderValue::from_str(&format!("{SESSION_COOKIE}={locale}; Path=/; HttpOnly; SameSite=Lax"))
}

/// Locale active for the current request, if inside the middleware.
pub fn current_locale() -> Option<String> {
    REQUEST_LOCALE.try_with(Clone::clone).ok()
}

/// Middleware activating the negotiated locale for the rest of the chain.
pub async fn set_locale(
    State(negotiator): State<Arc<LocaleNegotiator>>,
    mut req: Request,
    next: Next,
) -> Response {
    let session = session_locale(req.headers());
    let accept_language = req
        .headers()
        .get(ACCEPT_LANGUAGE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let negotiation = negotiator
        .negotiate(session.as_deref(), accept_language.as_deref())
        .await;

    req.extensions_mut().insert(ActiveLocale(negotiation.locale.clone()));
    let mut response = REQUEST_LOCALE
        .scope(negotiation.locale, async move { next.run(req).await })
        .await;

    if let Some(locale) = negotiation.session_update {
        match session_cookie(&locale) {
            Ok(cookie) => {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
            Err(e) => warn!(locale = %locale, "Cannot store locale in session: {}", e),
        }
    }

    response
}
