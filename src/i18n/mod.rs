//! Locale handling.
//!
//! # Architecture
//!
//! - `registry`: the configured locales, in display order
//! - `lookup`: key resolution against grouped translation files
//! - `negotiator`: per-request locale selection middleware

mod lookup;
mod negotiator;
mod registry;

pub use lookup::GroupFileLookup;
pub use negotiator::{
    current_locale, preferred_locale, session_cookie, session_locale, set_locale, ActiveLocale,
    LocaleNegotiator, Negotiation, AVAILABLE_LOCALES_TTL, SESSION_COOKIE,
};
pub use registry::{LocaleDescriptor, LocaleRegistry};
