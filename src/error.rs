//! Error taxonomy for the localization pipeline.
//!
//! Every fallible operation in the crate returns [`AppError`], a tagged union
//! over five categories. Each category carries a payload with a stable code
//! and a human-readable message; errors are immutable once constructed.

use std::fmt;
use std::time::Duration;

/// Convenience alias used throughout the crate.
pub type AppResult<T> = Result<T, AppError>;

/// Top-level error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    AiService,
    FileSystem,
    Cache,
    Validation,
    Configuration,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::AiService => "AI_SERVICE",
            ErrorCategory::FileSystem => "FILE_SYSTEM",
            ErrorCategory::Cache => "CACHE",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Configuration => "CONFIGURATION",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generates a code enum with its stable wire string and default message.
macro_rules! error_codes {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => ($code:literal, $msg:literal)),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Stable string form of the code.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $code),+
                }
            }

            /// Default human-readable message for the code.
            pub fn default_message(&self) -> &'static str {
                match self {
                    $($name::$variant => $msg),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

error_codes! {
    /// AI translation service failures.
    AiErrorCode {
        NetworkError => ("AI_NETWORK_ERROR", "Network error occurred while connecting to AI service"),
        ApiKeyInvalid => ("AI_API_KEY_INVALID", "Invalid API key provided for AI service"),
        ApiKeyMissing => ("AI_API_KEY_MISSING", "API key is required but not configured"),
        RateLimitExceeded => ("AI_RATE_LIMIT_EXCEEDED", "AI service rate limit exceeded, please try again later"),
        InvalidResponse => ("AI_INVALID_RESPONSE", "AI service returned an invalid response"),
        TranslationFailed => ("AI_TRANSLATION_FAILED", "Translation request failed"),
        Timeout => ("AI_TIMEOUT", "AI service request timed out"),
        QuotaExceeded => ("AI_QUOTA_EXCEEDED", "AI service quota exceeded"),
        ServiceUnavailable => ("AI_SERVICE_UNAVAILABLE", "AI service is currently unavailable"),
    }
}

error_codes! {
    /// Durable store failures.
    FileSystemErrorCode {
        FileNotFound => ("FS_FILE_NOT_FOUND", "Translation file not found"),
        PermissionDenied => ("FS_PERMISSION_DENIED", "Permission denied accessing translation files"),
        DiskFull => ("FS_DISK_FULL", "Insufficient disk space for translation files"),
        InvalidPath => ("FS_INVALID_PATH", "Invalid file path specified"),
        CorruptionDetected => ("FS_CORRUPTION_DETECTED", "Translation file corruption detected"),
        BackupFailed => ("FS_BACKUP_FAILED", "Failed to create backup of translation file"),
        RestoreFailed => ("FS_RESTORE_FAILED", "Failed to restore translation file from backup"),
        WriteFailed => ("FS_WRITE_FAILED", "Failed to write translation file"),
        ReadFailed => ("FS_READ_FAILED", "Failed to read translation file"),
        DirectoryCreationFailed => ("FS_DIRECTORY_CREATION_FAILED", "Failed to create translation directory"),
    }
}

error_codes! {
    /// In-memory cache failures.
    CacheErrorCode {
        MemoryLimitExceeded => ("CACHE_MEMORY_LIMIT_EXCEEDED", "Cache memory limit exceeded"),
        InvalidKey => ("CACHE_INVALID_KEY", "Invalid cache key provided"),
        CorruptionDetected => ("CACHE_CORRUPTION_DETECTED", "Cache corruption detected"),
        EvictionFailed => ("CACHE_EVICTION_FAILED", "Failed to evict items from cache"),
    }
}

error_codes! {
    /// Input validation failures.
    ValidationErrorCode {
        InvalidLanguageCode => ("VALIDATION_INVALID_LANGUAGE_CODE", "Invalid language code format"),
        InvalidTranslationKey => ("VALIDATION_INVALID_TRANSLATION_KEY", "Invalid translation key format"),
        EmptySourceText => ("VALIDATION_EMPTY_SOURCE_TEXT", "Source text cannot be empty"),
        InvalidTranslationFormat => ("VALIDATION_INVALID_TRANSLATION_FORMAT", "Invalid translation format"),
        MissingRequiredField => ("VALIDATION_MISSING_REQUIRED_FIELD", "Required field is missing"),
    }
}

error_codes! {
    /// Configuration failures.
    ConfigurationErrorCode {
        MissingApiKey => ("CONFIG_MISSING_API_KEY", "API key configuration is missing"),
        InvalidLanguageConfig => ("CONFIG_INVALID_LANGUAGE_CONFIG", "Invalid language configuration"),
        MissingSourceLanguage => ("CONFIG_MISSING_SOURCE_LANGUAGE", "Source language not configured"),
        InvalidFilePath => ("CONFIG_INVALID_FILE_PATH", "Invalid translation file path configuration"),
    }
}

/// Payload shared by every category: a code plus the rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail<C> {
    pub code: C,
    pub message: String,
}

impl<C> ErrorDetail<C> {
    fn new(code: C, default_message: &str, details: Option<&str>) -> Self {
        let message = match details {
            Some(d) if !d.is_empty() => format!("{}: {}", default_message, d),
            _ => default_message.to_string(),
        };
        Self { code, message }
    }
}

pub type AiServiceError = ErrorDetail<AiErrorCode>;
pub type FileSystemError = ErrorDetail<FileSystemErrorCode>;
pub type CacheError = ErrorDetail<CacheErrorCode>;
pub type ValidationError = ErrorDetail<ValidationErrorCode>;
pub type ConfigurationError = ErrorDetail<ConfigurationErrorCode>;

/// Any error raised by the localization pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    #[error("[{}] {}", .0.code, .0.message)]
    AiService(AiServiceError),
    #[error("[{}] {}", .0.code, .0.message)]
    FileSystem(FileSystemError),
    #[error("[{}] {}", .0.code, .0.message)]
    Cache(CacheError),
    #[error("[{}] {}", .0.code, .0.message)]
    Validation(ValidationError),
    #[error("[{}] {}", .0.code, .0.message)]
    Configuration(ConfigurationError),
}

const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
const RETRY_JITTER_FACTOR: f64 = 0.1;

impl AppError {
    pub fn ai(code: AiErrorCode, details: impl AsRef<str>) -> Self {
        AppError::AiService(ErrorDetail::new(
            code,
            code.default_message(),
            Some(details.as_ref()),
        ))
    }

    pub fn fs(code: FileSystemErrorCode, details: impl AsRef<str>) -> Self {
        AppError::FileSystem(ErrorDetail::new(
            code,
            code.default_message(),
            Some(details.as_ref()),
        ))
    }

    pub fn cache(code: CacheErrorCode, details: impl AsRef<str>) -> Self {
        AppError::Cache(ErrorDetail::new(
            code,
            code.default_message(),
            Some(details.as_ref()),
        ))
    }

    pub fn validation(code: ValidationErrorCode, details: impl AsRef<str>) -> Self {
        AppError::Validation(ErrorDetail::new(
            code,
            code.default_message(),
            Some(details.as_ref()),
        ))
    }

    pub fn config(code: ConfigurationErrorCode, details: impl AsRef<str>) -> Self {
        AppError::Configuration(ErrorDetail::new(
            code,
            code.default_message(),
            Some(details.as_ref()),
        ))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::AiService(_) => ErrorCategory::AiService,
            AppError::FileSystem(_) => ErrorCategory::FileSystem,
            AppError::Cache(_) => ErrorCategory::Cache,
            AppError::Validation(_) => ErrorCategory::Validation,
            AppError::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    /// Stable code string, e.g. `AI_RATE_LIMIT_EXCEEDED`.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::AiService(e) => e.code.as_str(),
            AppError::FileSystem(e) => e.code.as_str(),
            AppError::Cache(e) => e.code.as_str(),
            AppError::Validation(e) => e.code.as_str(),
            AppError::Configuration(e) => e.code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::AiService(e) => &e.message,
            AppError::FileSystem(e) => &e.message,
            AppError::Cache(e) => &e.message,
            AppError::Validation(e) => &e.message,
            AppError::Configuration(e) => &e.message,
        }
    }

    pub fn ai_code(&self) -> Option<AiErrorCode> {
        match self {
            AppError::AiService(e) => Some(e.code),
            _ => None,
        }
    }

    pub fn fs_code(&self) -> Option<FileSystemErrorCode> {
        match self {
            AppError::FileSystem(e) => Some(e.code),
            _ => None,
        }
    }

    /// Transient AI failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.ai_code(),
            Some(
                AiErrorCode::NetworkError
                    | AiErrorCode::Timeout
                    | AiErrorCode::ServiceUnavailable
                    | AiErrorCode::RateLimitExceeded
            )
        )
    }

    /// Backoff delay for the given (1-based) attempt, zero if not retryable.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        if !self.is_retryable() {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(16);
        let delay = RETRY_BASE_DELAY
            .saturating_mul(2u32.pow(exp))
            .min(RETRY_MAX_DELAY);
        delay + delay.mul_f64(rand::random::<f64>() * RETRY_JITTER_FACTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_includes_details() {
        let err = AppError::ai(AiErrorCode::RateLimitExceeded, "Daily cap reached");
        assert_eq!(
            err.message(),
            "AI service rate limit exceeded, please try again later: Daily cap reached"
        );
        assert_eq!(err.code(), "AI_RATE_LIMIT_EXCEEDED");
        assert_eq!(err.category(), ErrorCategory::AiService);
    }

    #[test]
    fn test_empty_details_uses_default_message() {
        let err = AppError::fs(FileSystemErrorCode::FileNotFound, "");
        assert_eq!(err.message(), "Translation file not found");
    }

    #[test]
    fn test_display_format() {
        let err = AppError::validation(ValidationErrorCode::EmptySourceText, "Text cannot be empty");
        let rendered = err.to_string();
        assert!(rendered.starts_with("[VALIDATION_EMPTY_SOURCE_TEXT]"));
        assert!(rendered.contains("Text cannot be empty"));
    }

    #[test]
    fn test_retryable_codes() {
        for code in [
            AiErrorCode::NetworkError,
            AiErrorCode::Timeout,
            AiErrorCode::ServiceUnavailable,
            AiErrorCode::RateLimitExceeded,
        ] {
            assert!(AppError::ai(code, "x").is_retryable(), "{} should retry", code);
        }

        for code in [
            AiErrorCode::ApiKeyInvalid,
            AiErrorCode::ApiKeyMissing,
            AiErrorCode::QuotaExceeded,
            AiErrorCode::InvalidResponse,
            AiErrorCode::TranslationFailed,
        ] {
            assert!(!AppError::ai(code, "x").is_retryable(), "{} should not retry", code);
        }

        assert!(!AppError::fs(FileSystemErrorCode::WriteFailed, "x").is_retryable());
        assert!(!AppError::config(ConfigurationErrorCode::MissingApiKey, "x").is_retryable());
    }

    #[test]
    fn test_retry_delay_grows_and_caps() {
        let err = AppError::ai(AiErrorCode::Timeout, "slow");

        let first = err.retry_delay(1);
        assert!(first >= Duration::from_secs(1) && first <= Duration::from_millis(1100));

        let third = err.retry_delay(3);
        assert!(third >= Duration::from_secs(4) && third <= Duration::from_millis(4400));

        let capped = err.retry_delay(10);
        assert!(capped >= Duration::from_secs(30) && capped <= Duration::from_secs(33));
    }

    #[test]
    fn test_retry_delay_zero_for_non_retryable() {
        let err = AppError::ai(AiErrorCode::ApiKeyInvalid, "bad key");
        assert_eq!(err.retry_delay(1), Duration::ZERO);
    }

    #[test]
    fn test_accessors() {
        let err = AppError::fs(FileSystemErrorCode::CorruptionDetected, "bad json");
        assert_eq!(err.fs_code(), Some(FileSystemErrorCode::CorruptionDetected));
        assert_eq!(err.ai_code(), None);
        assert_eq!(ErrorCategory::FileSystem.to_string(), "FILE_SYSTEM");
    }
}
