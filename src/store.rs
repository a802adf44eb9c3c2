//! Durable per-language translation files.
//!
//! Layout: `<root>/<language>/translation.json`, a nested JSON tree whose
//! dot-joined paths are the translation keys. Next to each file live the
//! `.backup` copy and, briefly, `.tmp.<uuid>` artifacts of in-progress writes.
//!
//! Writes are atomic: ensure dir, refresh backup, write temp, re-read and
//! parse temp, rename over the primary. Readers never observe a torn file.

use crate::error::{AppError, AppResult, FileSystemErrorCode, ValidationErrorCode};
use crate::locale::{LanguageCode, MAX_KEY_DEPTH};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A language's translations as `dot.separated.key -> text`.
pub type FlatTranslations = HashMap<String, String>;

pub const TRANSLATION_FILE: &str = "translation.json";
pub const BACKUP_SUFFIX: &str = ".backup";
pub const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub max_depth: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("src/locales"),
            max_depth: MAX_KEY_DEPTH,
        }
    }
}

pub struct TranslationStore {
    config: StoreConfig,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TranslationStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn language_dir(&self, language: &str) -> PathBuf {
        self.config.root.join(language)
    }

    pub fn file_path(&self, language: &str) -> PathBuf {
        self.language_dir(language).join(TRANSLATION_FILE)
    }

    pub fn backup_path(&self, language: &str) -> PathBuf {
        append_suffix(&self.file_path(language), BACKUP_SUFFIX)
    }

    fn temp_path(&self, language: &str) -> PathBuf {
        append_suffix(
            &self.file_path(language),
            &format!("{}.{}", TEMP_SUFFIX, uuid::Uuid::new_v4().simple()),
        )
    }

    fn write_lock(&self, language: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.write_locks
            .lock()
            .entry(language.to_string())
            .or_default()
            .clone()
    }

    // ==================== Read ====================

    /// Read a language file as a flat map.
    ///
    /// A file that does not parse is replaced by its backup when the backup
    /// parses; otherwise `FS_CORRUPTION_DETECTED` is returned. The repair
    /// runs under the language's write lock.
    pub async fn read(&self, language: &str) -> AppResult<FlatTranslations> {
        validate_language(language)?;
        match self.parse_primary(language).await? {
            Ok(translations) => Ok(translations),
            Err(_) => {
                let lock = self.write_lock(language);
                let _guard = lock.lock().await;
                self.read_locked(language).await
            }
        }
    }

    /// `read` for callers already holding the language's write lock.
    async fn read_locked(&self, language: &str) -> AppResult<FlatTranslations> {
        match self.parse_primary(language).await? {
            Ok(translations) => Ok(translations),
            Err(parse_error) => {
                let path = self.file_path(language);
                warn!(
                    "Translation file {} is corrupt ({}), trying backup",
                    path.display(),
                    parse_error
                );
                self.recover_from_backup(language, &path, &parse_error).await
            }
        }
    }

    /// The outer error is a missing or unreadable file, the inner one a parse
    /// failure.
    async fn parse_primary(
        &self,
        language: &str,
    ) -> AppResult<Result<FlatTranslations, String>> {
        let path = self.file_path(language);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(AppError::fs(
                    FileSystemErrorCode::FileNotFound,
                    format!("Translation file not found: {}", path.display()),
                ))
            }
            Err(e) => return Err(map_io(e, &path, FileSystemErrorCode::ReadFailed)),
        };
        Ok(parse_tree(&bytes).map(|tree| flatten(&tree)))
    }

    async fn recover_from_backup(
        &self,
        language: &str,
        path: &Path,
        parse_error: &str,
    ) -> AppResult<FlatTranslations> {
        let corrupted = || {
            AppError::fs(
                FileSystemErrorCode::CorruptionDetected,
                format!("Invalid JSON in translation file {}: {}", path.display(), parse_error),
            )
        };

        let backup_path = self.backup_path(language);
        let backup = match tokio::fs::read(&backup_path).await {
            Ok(bytes) => bytes,
            Err(_) => return Err(corrupted()),
        };

        let tree = match parse_tree(&backup) {
            Ok(tree) => tree,
            Err(e) => {
                warn!("Backup {} is corrupt as well: {}", backup_path.display(), e);
                return Err(corrupted());
            }
        };

        let tmp = self.temp_path(language);
        if let Err(e) = replace_file(&tmp, path, &backup).await {
            warn!(
                "Recovered {} from backup but could not repair the primary file: {}",
                language, e
            );
        } else {
            info!("Restored corrupt translation file for {} from backup", language);
        }

        Ok(flatten(&tree))
    }

    // ==================== Write ====================

    /// Atomically replace a language file with the given translations.
    pub async fn write(&self, language: &str, translations: &FlatTranslations) -> AppResult<()> {
        validate_language(language)?;
        let lock = self.write_lock(language);
        let _guard = lock.lock().await;
        self.write_locked(language, translations).await
    }

    /// Read-modify-write under the language's write lock.
    ///
    /// A missing file starts from an empty map.
    ///
    /// # Returns
    /// The merged translations that were written.
    pub async fn merge(
        &self,
        language: &str,
        entries: &FlatTranslations,
    ) -> AppResult<FlatTranslations> {
        validate_language(language)?;
        let lock = self.write_lock(language);
        let _guard = lock.lock().await;

        let mut current = match self.read_locked(language).await {
            Ok(current) => current,
            Err(e) if e.fs_code() == Some(FileSystemErrorCode::FileNotFound) => HashMap::new(),
            Err(e) => return Err(e),
        };
        current.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));

        self.write_locked(language, &current).await?;
        Ok(current)
    }

    async fn write_locked(&self, language: &str, translations: &FlatTranslations) -> AppResult<()> {
        let path = self.file_path(language);

        // 1. directory
        self.create_language_directory(language).await?;

        // 2. backup of the current, still valid, file
        self.backup(language).await?;

        // 3-5. temp, verify, rename
        let tree = unflatten(translations, self.config.max_depth).map_err(|e| {
            AppError::fs(
                FileSystemErrorCode::WriteFailed,
                format!("Failed to build translation tree for {}: {}", language, e.message()),
            )
        })?;
        let content = to_pretty_json(&tree).map_err(|e| {
            AppError::fs(
                FileSystemErrorCode::WriteFailed,
                format!("Failed to serialize translations for {}: {}", language, e),
            )
        })?;

        let tmp = self.temp_path(language);
        replace_file(&tmp, &path, &content).await?;

        debug!("Wrote {} translations to {}", translations.len(), path.display());
        Ok(())
    }

    // ==================== Backup / Restore ====================

    /// Copy the primary file to `.backup`.
    ///
    /// A missing or unparsable primary is not copied, so a good backup is
    /// never replaced by a corrupt one.
    ///
    /// # Returns
    /// `true` if a backup was written.
    pub async fn backup(&self, language: &str) -> AppResult<bool> {
        validate_language(language)?;
        let path = self.file_path(language);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(AppError::fs(
                    FileSystemErrorCode::BackupFailed,
                    format!("Failed to read {} for backup: {}", path.display(), e),
                ))
            }
        };

        if let Err(e) = parse_tree(&bytes) {
            warn!(
                "Not backing up corrupt translation file {}: {}",
                path.display(),
                e
            );
            return Ok(false);
        }

        let backup_path = self.backup_path(language);
        tokio::fs::write(&backup_path, &bytes).await.map_err(|e| {
            AppError::fs(
                FileSystemErrorCode::BackupFailed,
                format!("Failed to create backup {}: {}", backup_path.display(), e),
            )
        })?;
        Ok(true)
    }

    /// Replace the primary file with its backup.
    pub async fn restore(&self, language: &str) -> AppResult<()> {
        validate_language(language)?;
        let path = self.file_path(language);
        let backup_path = self.backup_path(language);

        let bytes = tokio::fs::read(&backup_path).await.map_err(|e| {
            AppError::fs(
                FileSystemErrorCode::RestoreFailed,
                format!("Backup file not readable {}: {}", backup_path.display(), e),
            )
        })?;

        parse_tree(&bytes).map_err(|e| {
            AppError::fs(
                FileSystemErrorCode::RestoreFailed,
                format!("Backup file {} is corrupt: {}", backup_path.display(), e),
            )
        })?;

        let lock = self.write_lock(language);
        let _guard = lock.lock().await;
        let tmp = self.temp_path(language);
        replace_file(&tmp, &path, &bytes).await.map_err(|e| {
            AppError::fs(
                FileSystemErrorCode::RestoreFailed,
                format!("Failed to restore {}: {}", path.display(), e.message()),
            )
        })?;

        info!("Restored {} from backup", path.display());
        Ok(())
    }

    // ==================== Directories ====================

    pub async fn ensure_directory(&self) -> AppResult<()> {
        tokio::fs::create_dir_all(&self.config.root)
            .await
            .map_err(|e| {
                map_io(
                    e,
                    &self.config.root,
                    FileSystemErrorCode::DirectoryCreationFailed,
                )
            })
    }

    pub async fn create_language_directory(&self, language: &str) -> AppResult<()> {
        validate_language(language)?;
        let dir = self.language_dir(language);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| map_io(e, &dir, FileSystemErrorCode::DirectoryCreationFailed))
    }

    /// Delete a language directory with its files. Missing directories are fine.
    pub async fn remove_language(&self, language: &str) -> AppResult<()> {
        validate_language(language)?;
        let dir = self.language_dir(language);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io(e, &dir, FileSystemErrorCode::WriteFailed)),
        }
    }

    pub async fn exists(&self, language: &str) -> bool {
        if !LanguageCode::is_valid(language) {
            return false;
        }
        tokio::fs::metadata(self.file_path(language))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Language directories holding a translation file, sorted.
    ///
    /// Directories with an invalid code or without a file are skipped.
    pub async fn list_languages(&self) -> AppResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.config.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(map_io(e, &self.config.root, FileSystemErrorCode::ReadFailed)),
        };

        let mut languages = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| map_io(e, &self.config.root, FileSystemErrorCode::ReadFailed))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if LanguageCode::is_valid(&name) && self.exists(&name).await {
                languages.push(name);
            }
        }

        languages.sort();
        Ok(languages)
    }

    /// Copy the full content of `source` into `target`.
    ///
    /// # Returns
    /// The number of keys copied.
    pub async fn copy_structure(&self, source: &str, target: &str) -> AppResult<usize> {
        validate_language(source)?;
        validate_language(target)?;
        if source == target {
            return Err(AppError::validation(
                ValidationErrorCode::InvalidLanguageCode,
                "Source and target languages cannot be the same",
            ));
        }

        let translations = self.read(source).await.map_err(|e| {
            if e.fs_code() == Some(FileSystemErrorCode::FileNotFound) {
                AppError::fs(
                    FileSystemErrorCode::FileNotFound,
                    format!("Source language file not found: {}", source),
                )
            } else {
                e
            }
        })?;

        self.write(target, &translations).await?;
        info!(
            "Copied {} keys from {} to {}",
            translations.len(),
            source,
            target
        );
        Ok(translations.len())
    }
}

fn validate_language(language: &str) -> AppResult<()> {
    LanguageCode::parse(language).map(|_| ())
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn map_io(e: io::Error, path: &Path, fallback: FileSystemErrorCode) -> AppError {
    let code = if e.kind() == io::ErrorKind::PermissionDenied {
        FileSystemErrorCode::PermissionDenied
    } else if matches!(e.raw_os_error(), Some(28) | Some(112)) {
        // ENOSPC / ERROR_DISK_FULL
        FileSystemErrorCode::DiskFull
    } else {
        fallback
    };
    AppError::fs(code, format!("{}: {}", path.display(), e))
}

/// Write `content` to `tmp`, verify it parses, then rename it over `path`.
/// The temp file is removed on any failure.
async fn replace_file(tmp: &Path, path: &Path, content: &[u8]) -> AppResult<()> {
    let result = async {
        tokio::fs::write(tmp, content)
            .await
            .map_err(|e| map_io(e, tmp, FileSystemErrorCode::WriteFailed))?;

        let written = tokio::fs::read(tmp)
            .await
            .map_err(|e| map_io(e, tmp, FileSystemErrorCode::WriteFailed))?;
        parse_tree(&written).map_err(|e| {
            AppError::fs(
                FileSystemErrorCode::WriteFailed,
                format!("Verification of {} failed: {}", tmp.display(), e),
            )
        })?;

        tokio::fs::rename(tmp, path)
            .await
            .map_err(|e| map_io(e, path, FileSystemErrorCode::WriteFailed))
    }
    .await;

    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(tmp).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to delete temp file {}: {}", tmp.display(), e);
            }
        }
    }
    result
}

/// Parse file content into a JSON object.
fn parse_tree(bytes: &[u8]) -> Result<Map<String, Value>, String> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("top-level value is not an object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn to_pretty_json(tree: &Map<String, Value>) -> serde_json::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    tree.serialize(&mut ser)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Flatten a nested tree; non-string leaves are skipped.
pub fn flatten(tree: &Map<String, Value>) -> FlatTranslations {
    fn walk(prefix: &str, tree: &Map<String, Value>, out: &mut FlatTranslations) {
        for (key, value) in tree {
            let full = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            match value {
                Value::String(s) => {
                    out.insert(full, s.clone());
                }
                Value::Object(child) => walk(&full, child, out),
                _ => {}
            }
        }
    }

    let mut out = HashMap::new();
    walk("", tree, &mut out);
    out
}

/// Build the nested tree of a flat map.
///
/// Keys deeper than `max_depth`, keys with empty segments, and keys that
/// would need a text to also be a section are rejected.
pub fn unflatten(flat: &FlatTranslations, max_depth: usize) -> AppResult<Map<String, Value>> {
    let invalid = |details: String| {
        AppError::validation(ValidationErrorCode::InvalidTranslationFormat, details)
    };

    let mut keys: Vec<&String> = flat.keys().collect();
    keys.sort();

    let mut root = Map::new();
    for key in keys {
        let segments: Vec<&str> = key.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid(format!("Key has an empty segment: {}", key)));
        }
        if segments.len() > max_depth {
            return Err(invalid(format!(
                "Key nested too deeply: {} (max depth: {})",
                key, max_depth
            )));
        }

        let (leaf, parents) = match segments.split_last() {
            Some(split) => split,
            None => continue,
        };

        let mut current = &mut root;
        for segment in parents {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = match entry {
                Value::Object(map) => map,
                _ => {
                    return Err(invalid(format!(
                        "Key {} conflicts with an existing text at '{}'",
                        key, segment
                    )))
                }
            };
        }

        if let Some(Value::Object(_)) = current.get(*leaf) {
            return Err(invalid(format!(
                "Key {} conflicts with an existing section",
                key
            )));
        }
        current.insert(leaf.to_string(), Value::String(flat[key].clone()));
    }
    Ok(root)
}
