//! Translation keys: dot-segmented identifiers of UI texts.

use crate::error::{AppError, AppResult, ValidationErrorCode};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

pub const MAX_KEY_LENGTH: usize = 200;
pub const MAX_KEY_DEPTH: usize = 10;

/// Keys under these prefixes are never sent for automatic translation.
pub const RESERVED_KEY_PREFIXES: &[&str] = &["system.", "internal.", "debug.", "test."];

/// Context used when a key carries no recognizable role.
pub const GENERAL_CONTEXT: &str = "General application text";

/// UI role substrings and the description handed to the translator.
const ROLE_CONTEXTS: &[(&str, &str)] = &[
    ("nav", "Navigation menu"),
    ("button", "Button or action element"),
    ("form", "Form field or validation"),
    ("error", "Error message"),
    ("success", "Success message"),
    ("modal", "Modal dialog"),
    ("tooltip", "Tooltip or help text"),
    ("placeholder", "Input placeholder text"),
    ("label", "Form label"),
    ("title", "Page or section title"),
    ("description", "Description text"),
    ("player", "Media player interface"),
    ("controls", "Control interface"),
    ("panel", "UI panel or section"),
];

static KEY_REGEX: OnceLock<Regex> = OnceLock::new();
static VARIABLE_REGEX: OnceLock<Regex> = OnceLock::new();

fn key_regex() -> &'static Regex {
    KEY_REGEX.get_or_init(|| Regex::new(r"^[A-Za-z0-9._ -]+$").unwrap())
}

fn variable_regex() -> &'static Regex {
    VARIABLE_REGEX.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").unwrap())
}

/// A validated translation key such as `player.controls.play`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TranslationKey(String);

impl TranslationKey {
    /// Trim and validate a key.
    pub fn parse(key: &str) -> AppResult<Self> {
        let normalized = key.trim();

        if normalized.is_empty() {
            return Err(invalid_key("Translation key cannot be empty"));
        }
        if normalized.len() > MAX_KEY_LENGTH {
            return Err(invalid_key(format!(
                "Translation key too long: {} characters (max: {})",
                normalized.len(),
                MAX_KEY_LENGTH
            )));
        }
        if !key_regex().is_match(normalized) {
            return Err(invalid_key(format!(
                "Invalid translation key format: {}",
                normalized
            )));
        }
        if normalized.split('.').any(|segment| segment.is_empty()) {
            return Err(invalid_key(format!(
                "Translation key has an empty segment: {}",
                normalized
            )));
        }
        if depth(normalized) > MAX_KEY_DEPTH {
            return Err(invalid_key(format!(
                "Translation key nested too deeply: {} (max depth: {})",
                normalized, MAX_KEY_DEPTH
            )));
        }

        Ok(Self(normalized.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_reserved(&self) -> bool {
        is_reserved_key(&self.0)
    }

    pub fn context(&self) -> String {
        parse_key_context(&self.0)
    }
}

impl fmt::Display for TranslationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TranslationKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn invalid_key(details: impl AsRef<str>) -> AppError {
    AppError::validation(ValidationErrorCode::InvalidTranslationKey, details)
}

fn depth(key: &str) -> usize {
    key.split('.').count()
}

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEY_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
}

/// Describe a key's UI role for the translator.
///
/// The last segment is checked first, then the enclosing namespace. A match
/// yields `"<role> in the <namespace> section"`; a namespaced key without a
/// known role yields `"<namespace> section of the application"`.
pub fn parse_key_context(key: &str) -> String {
    let key = key.trim();
    if key.is_empty() {
        return GENERAL_CONTEXT.to_string();
    }

    let (namespace, last) = match key.rsplit_once('.') {
        Some((ns, last)) => (Some(ns), last),
        None => (None, key),
    };

    let find_role = |haystack: &str| {
        let haystack = haystack.to_lowercase();
        ROLE_CONTEXTS
            .iter()
            .find(|(pattern, _)| haystack.contains(pattern))
            .map(|(_, context)| *context)
    };

    let role = find_role(last).or_else(|| namespace.and_then(find_role));

    match (role, namespace) {
        (Some(role), Some(ns)) => format!("{} in the {} section", role, ns),
        (Some(role), None) => role.to_string(),
        (None, Some(ns)) => format!("{} section of the application", ns),
        (None, None) => GENERAL_CONTEXT.to_string(),
    }
}

/// Replace `{{name}}` placeholders; unknown names are left intact.
pub fn interpolate(text: &str, variables: &HashMap<String, String>) -> String {
    if variables.is_empty() || !text.contains("{{") {
        return text.to_string();
    }

    variable_regex()
        .replace_all(text, |caps: &regex::Captures| {
            variables
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Placeholder names in order of appearance.
pub fn extract_placeholders(text: &str) -> Vec<String> {
    variable_regex()
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .collect()
}
