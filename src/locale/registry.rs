//! Language registry: the set of languages the pipeline currently serves.
//!
//! Unlike a global table, the registry is owned by the translation manager
//! and mutated at runtime when languages are added or rolled back.

use super::language::LanguageCode;
use parking_lot::RwLock;
use serde::Serialize;

/// Metadata for a registered language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageConfig {
    /// Validated code (e.g. "en", "zh-CN")
    pub code: LanguageCode,

    /// Human-readable name (e.g. "Français")
    pub name: String,

    /// Whether this is the source language (exactly one is)
    pub is_source: bool,
}

/// Runtime registry of served languages.
///
/// The source language is registered on construction and can never be removed.
#[derive(Debug)]
pub struct LanguageRegistry {
    source: LanguageCode,
    languages: RwLock<Vec<LanguageConfig>>,
}

impl LanguageRegistry {
    pub fn new(source: LanguageCode) -> Self {
        let name = source.display_name().to_string();
        Self {
            languages: RwLock::new(vec![LanguageConfig {
                code: source.clone(),
                name,
                is_source: true,
            }]),
            source,
        }
    }

    pub fn source(&self) -> &LanguageCode {
        &self.source
    }

    pub fn is_source(&self, code: &str) -> bool {
        self.source.as_str() == code
    }

    /// Register a language, replacing the name if it already exists.
    ///
    /// # Returns
    /// `true` if the language was newly added.
    pub fn register(&self, code: LanguageCode, name: impl Into<String>) -> bool {
        let name = name.into();
        let mut languages = self.languages.write();
        if let Some(existing) = languages.iter_mut().find(|l| l.code == code) {
            if !existing.is_source {
                existing.name = name;
            }
            return false;
        }
        languages.push(LanguageConfig {
            code,
            name,
            is_source: false,
        });
        true
    }

    /// Remove a non-source language. Returns `false` for the source or unknown codes.
    pub fn unregister(&self, code: &str) -> bool {
        if self.is_source(code) {
            return false;
        }
        let mut languages = self.languages.write();
        let before = languages.len();
        languages.retain(|l| l.code.as_str() != code);
        languages.len() != before
    }

    pub fn contains(&self, code: &str) -> bool {
        self.languages.read().iter().any(|l| l.code.as_str() == code)
    }

    pub fn get(&self, code: &str) -> Option<LanguageConfig> {
        self.languages
            .read()
            .iter()
            .find(|l| l.code.as_str() == code)
            .cloned()
    }

    /// All registered languages, source first, others sorted by code.
    pub fn list(&self) -> Vec<LanguageConfig> {
        let mut all = self.languages.read().clone();
        all.sort_by(|a, b| b.is_source.cmp(&a.is_source).then(a.code.cmp(&b.code)));
        all
    }

    /// Registered languages other than the source, sorted by code.
    pub fn targets(&self) -> Vec<LanguageCode> {
        let mut targets: Vec<LanguageCode> = self
            .languages
            .read()
            .iter()
            .filter(|l| !l.is_source)
            .map(|l| l.code.clone())
            .collect();
        targets.sort();
        targets
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new(LanguageCode::default_source())
    }
}
