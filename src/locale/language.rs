//! Language codes: validated, owned representation of a locale identifier.
//!
//! A code is either two lowercase letters (`en`) or two lowercase letters
//! followed by a dash and an uppercase region (`zh-CN`).

use crate::error::{AppError, AppResult, ValidationErrorCode};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Maximum accepted length of a language code.
pub const MAX_LANGUAGE_CODE_LENGTH: usize = 10;

/// Maximum accepted length of a display name.
pub const MAX_LANGUAGE_NAME_LENGTH: usize = 100;

/// Language used when nothing else is configured.
pub const DEFAULT_SOURCE_LANGUAGE: &str = "en";

static CODE_REGEX: OnceLock<Regex> = OnceLock::new();

fn code_regex() -> &'static Regex {
    CODE_REGEX.get_or_init(|| Regex::new(r"^[a-z]{2}(-[A-Z]{2})?$").unwrap())
}

/// Native display names of commonly requested languages.
pub const COMMON_LANGUAGES: &[(&str, &str)] = &[
    ("en", "English"),
    ("pt", "Português"),
    ("es", "Español"),
    ("fr", "Français"),
    ("de", "Deutsch"),
    ("it", "Italiano"),
    ("ja", "日本語"),
    ("ko", "한국어"),
    ("zh", "中文"),
    ("zh-CN", "中文 (简体)"),
    ("zh-TW", "中文 (繁體)"),
    ("ru", "Русский"),
    ("ar", "العربية"),
    ("hi", "हिन्दी"),
    ("nl", "Nederlands"),
    ("sv", "Svenska"),
    ("da", "Dansk"),
    ("no", "Norsk"),
    ("fi", "Suomi"),
    ("pl", "Polski"),
    ("cs", "Čeština"),
    ("sk", "Slovenčina"),
    ("hu", "Magyar"),
    ("ro", "Română"),
    ("bg", "Български"),
    ("hr", "Hrvatski"),
    ("sl", "Slovenščina"),
    ("et", "Eesti"),
    ("lv", "Latviešu"),
    ("lt", "Lietuvių"),
    ("uk", "Українська"),
    ("tr", "Türkçe"),
    ("he", "עברית"),
    ("th", "ไทย"),
    ("vi", "Tiếng Việt"),
    ("id", "Bahasa Indonesia"),
    ("ms", "Bahasa Melayu"),
    ("tl", "Filipino"),
];

/// A validated language code such as `en` or `pt-BR`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LanguageCode(String);

impl LanguageCode {
    /// Parse and validate a language code.
    ///
    /// # Returns
    /// * `Ok(LanguageCode)` if the code matches the accepted pattern
    /// * `Err(VALIDATION_INVALID_LANGUAGE_CODE)` otherwise
    pub fn parse(code: &str) -> AppResult<Self> {
        if Self::is_valid(code) {
            Ok(Self(code.to_string()))
        } else {
            Err(AppError::validation(
                ValidationErrorCode::InvalidLanguageCode,
                format!("Invalid language code: {}", code),
            ))
        }
    }

    /// Check a raw string against the code rules without allocating.
    pub fn is_valid(code: &str) -> bool {
        !code.is_empty() && code.len() <= MAX_LANGUAGE_CODE_LENGTH && code_regex().is_match(code)
    }

    /// The built-in source language (`en`).
    pub fn default_source() -> Self {
        Self(DEFAULT_SOURCE_LANGUAGE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Display name from the common languages table, falling back to the code.
    pub fn display_name(&self) -> &str {
        common_language_name(&self.0).unwrap_or(&self.0)
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LanguageCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LanguageCode {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LanguageCode> for String {
    fn from(code: LanguageCode) -> Self {
        code.0
    }
}

/// Look up the native name of a language in the common table.
pub fn common_language_name(code: &str) -> Option<&'static str> {
    COMMON_LANGUAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Validate a human-readable language name (1..=100 characters after trimming).
pub fn validate_language_name(name: &str) -> AppResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(
            ValidationErrorCode::MissingRequiredField,
            "Language name cannot be empty",
        ));
    }
    if trimmed.chars().count() > MAX_LANGUAGE_NAME_LENGTH {
        return Err(AppError::validation(
            ValidationErrorCode::InvalidTranslationFormat,
            format!(
                "Language name too long (max {} characters)",
                MAX_LANGUAGE_NAME_LENGTH
            ),
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ==================== parse Tests ====================

    #[test]
    fn test_parse_plain_code() {
        let code = LanguageCode::parse("es").unwrap();
        assert_eq!(code.as_str(), "es");
        assert_eq!(code.to_string(), "es");
    }

    #[test]
    fn test_parse_region_code() {
        assert!(LanguageCode::parse("zh-CN").is_ok());
        assert!(LanguageCode::parse("pt-BR").is_ok());
    }

    #[test]
    fn test_parse_rejects_bad_codes() {
        for bad in ["", "EN", "eng", "e", "zh-cn", "zh_CN", "zh-CNN", "../en", "en "] {
            let err = LanguageCode::parse(bad).unwrap_err();
            assert_eq!(err.code(), "VALIDATION_INVALID_LANGUAGE_CODE", "{:?}", bad);
        }
    }

    // ==================== Name Tests ====================

    #[test]
    fn test_display_name_from_table() {
        assert_eq!(LanguageCode::parse("fr").unwrap().display_name(), "Français");
        assert_eq!(LanguageCode::parse("zh-TW").unwrap().display_name(), "中文 (繁體)");
    }

    #[test]
    fn test_display_name_falls_back_to_code() {
        assert_eq!(LanguageCode::parse("xx").unwrap().display_name(), "xx");
    }

    #[test]
    fn test_validate_language_name() {
        assert_eq!(validate_language_name("  Français ").unwrap(), "Français");
        assert!(validate_language_name("   ").is_err());
        assert!(validate_language_name(&"a".repeat(101)).is_err());
        assert!(validate_language_name(&"a".repeat(100)).is_ok());
    }

    // ==================== Serde Tests ====================

    #[test]
    fn test_serde_validates_on_deserialize() {
        let code: LanguageCode = serde_json::from_str("\"de\"").unwrap();
        assert_eq!(code.as_str(), "de");
        assert!(serde_json::from_str::<LanguageCode>("\"Deutsch\"").is_err());
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"de\"");
    }

    #[test]
    fn test_every_common_language_code_is_valid() {
        for (code, name) in COMMON_LANGUAGES {
            assert!(LanguageCode::is_valid(code), "{} should be valid", code);
            assert!(validate_language_name(name).is_ok());
        }
    }

    proptest! {
        #[test]
        fn prop_generated_codes_parse(code in "[a-z]{2}(-[A-Z]{2})?") {
            prop_assert!(LanguageCode::parse(&code).is_ok());
        }

        #[test]
        fn prop_uppercase_primary_rejected(code in "[A-Z]{2}") {
            prop_assert!(LanguageCode::parse(&code).is_err());
        }
    }
}
