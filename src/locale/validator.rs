//! Translation quality checks.
//!
//! A translation must keep every `{{variable}}` placeholder of its source.
//! Findings are advisory: the pipeline logs them and still stores the text.

use super::key::extract_placeholders;
use std::collections::BTreeSet;

/// Validation report containing errors and warnings about a translation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    /// Critical errors that indicate translation issues
    pub errors: Vec<String>,

    /// Non-critical warnings about potential issues
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Check if the report is clean (no errors or warnings)
    pub fn is_clean(&self) -> bool {
        !self.has_errors() && !self.has_warnings()
    }
}

/// Validator for AI translation output.
pub struct TranslationValidator;

impl TranslationValidator {
    /// Compare a translation against its source text.
    ///
    /// Errors:
    /// - the translation is empty
    ///
    /// Warnings:
    /// - a placeholder of the source is missing from the translation
    /// - the translation introduces placeholders absent from the source
    /// - the translation is identical to the source
    pub fn validate(source: &str, translated: &str) -> ValidationReport {
        let mut report = ValidationReport::new();

        if translated.trim().is_empty() {
            report.errors.push("Translation is empty".to_string());
            return report;
        }

        let source_vars: BTreeSet<String> = extract_placeholders(source).into_iter().collect();
        let translated_vars: BTreeSet<String> =
            extract_placeholders(translated).into_iter().collect();

        let missing: Vec<&String> = source_vars.difference(&translated_vars).collect();
        if !missing.is_empty() {
            report.warnings.push(format!(
                "Placeholder mismatch: translation is missing {:?}",
                missing
            ));
        }

        let extra: Vec<&String> = translated_vars.difference(&source_vars).collect();
        if !extra.is_empty() {
            report.warnings.push(format!(
                "Placeholder mismatch: translation introduces {:?}",
                extra
            ));
        }

        if source.trim() == translated.trim() {
            report
                .warnings
                .push("Translation is identical to the source text".to_string());
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_translation() {
        let report = TranslationValidator::validate("Hello {{name}}", "Hola {{name}}");
        assert!(report.is_clean(), "{:?}", report);
    }

    #[test]
    fn test_missing_placeholder_warns() {
        let report = TranslationValidator::validate("Hello {{name}}", "Hola");
        assert!(!report.has_errors());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("missing"));
        assert!(report.warnings[0].contains("name"));
    }

    #[test]
    fn test_introduced_placeholder_warns() {
        let report = TranslationValidator::validate("Hello", "Hola {{nombre}}");
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("introduces"));
    }

    #[test]
    fn test_identical_output_warns() {
        let report = TranslationValidator::validate("OK", "OK");
        assert!(report.has_warnings());
        assert!(report.warnings[0].contains("identical"));
    }

    #[test]
    fn test_empty_output_is_error() {
        let report = TranslationValidator::validate("Save", "  ");
        assert!(report.has_errors());
        assert!(!report.is_clean());
    }

    #[test]
    fn test_reordered_placeholders_are_fine() {
        let report =
            TranslationValidator::validate("{{count}} files by {{user}}", "{{user}}: {{count}} Dateien");
        assert!(report.is_clean(), "{:?}", report);
    }
}
