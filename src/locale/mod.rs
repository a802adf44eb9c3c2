//! Locale domain types shared by every pipeline component.
//!
//! - `language`: validated language codes and the common names table
//! - `key`: validated translation keys, context extraction, interpolation
//! - `registry`: languages currently served, owned by the manager
//! - `validator`: placeholder checks on AI output
//! - `metrics`: per-pipeline counters

mod key;
mod language;
mod metrics;
mod registry;
mod validator;

pub use key::{
    extract_placeholders, interpolate, is_reserved_key, parse_key_context, TranslationKey,
    GENERAL_CONTEXT, MAX_KEY_DEPTH, MAX_KEY_LENGTH, RESERVED_KEY_PREFIXES,
};
pub use language::{
    common_language_name, validate_language_name, LanguageCode, COMMON_LANGUAGES,
    DEFAULT_SOURCE_LANGUAGE,
};
pub use metrics::{MetricsReport, TranslationMetrics};
pub use registry::{LanguageConfig, LanguageRegistry};
pub use validator::{TranslationValidator, ValidationReport};
