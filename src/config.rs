//! Scan and refactor settings.
//!
//! Values come from an optional JSON file; command-line flags override them.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

// ============ Defaults ============

const DEFAULT_MAX_FILE_SIZE_MB: u64 = 10;
const DEFAULT_SNIPPET_MAX_LENGTH: usize = 500;

const DEFAULT_EXTENSIONS: &[&str] = &[
    "html", "htm", "xhtml", "cshtml", "vbhtml", "aspx", "ascx", "master", "asp", "php", "jsp",
    "js", "mjs", "css",
];

const DEFAULT_EXCLUDED_FOLDERS: &[&str] = &[
    "node_modules", ".git", ".svn", ".vs", ".idea", ".vscode", "bin", "obj", "packages", "dist",
    "build",
];

// ============ Scan Settings ============

/// Settings for the extraction phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Root of the tree to audit.
    pub root_folder: PathBuf,
    /// Where records and extracted files are written.
    pub output_folder: PathBuf,
    /// Lower-case extensions without the leading dot.
    pub include_extensions: BTreeSet<String>,
    /// Folder names skipped anywhere in the tree.
    pub exclude_folders: BTreeSet<String>,
    /// Glob patterns matched against file names.
    pub exclude_files: Vec<String>,
    pub max_file_size_mb: u64,
    /// Longest snippet kept in a record's preview field.
    pub snippet_max_length: usize,
    /// Worker count, 0 = one per core.
    pub threads: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root_folder: PathBuf::from("."),
            output_folder: PathBuf::from("reposcan-out"),
            include_extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            exclude_folders: DEFAULT_EXCLUDED_FOLDERS.iter().map(|f| f.to_string()).collect(),
            exclude_files: vec!["*.min.js".to_string(), "*.min.css".to_string()],
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            snippet_max_length: DEFAULT_SNIPPET_MAX_LENGTH,
            threads: 0,
        }
    }
}

impl ScanConfig {
    /// Load settings from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Configuration file '{}' not found. Using defaults.", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&text).map_err(|e| ScanError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.include_extensions = config
            .include_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Ok(config)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn includes_extension(&self, ext: &str) -> bool {
        self.include_extensions.contains(&ext.to_ascii_lowercase())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.root_folder.is_dir() {
            return Err(ScanError::Config {
                path: self.root_folder.clone(),
                reason: "root folder does not exist".to_string(),
            });
        }
        if self.max_file_size_mb == 0 {
            return Err(ScanError::Config {
                path: self.root_folder.clone(),
                reason: "max_file_size_mb must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// ============ Refactor Settings ============

/// Settings for the refactoring phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefactorConfig {
    /// URL prefix under which extracted scripts are served.
    pub script_base: String,
    /// URL prefix under which extracted styles are served.
    pub style_base: String,
    /// Marker placed at the start of every annotation comment.
    pub annotation_prefix: String,
    /// Worker count, 0 = one per core.
    pub threads: usize,
}

impl Default for RefactorConfig {
    fn default() -> Self {
        Self {
            script_base: "/js".to_string(),
            style_base: "/css".to_string(),
            annotation_prefix: "reposcan".to_string(),
            threads: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_legacy_views() {
        let config = ScanConfig::default();
        assert!(config.includes_extension("ASPX"));
        assert!(config.includes_extension("cshtml"));
        assert!(!config.includes_extension("png"));
        assert_eq!(config.max_file_size_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reposcan.json");
        fs::write(&path, r#"{ "max_file_size_mb": 2, "include_extensions": [".HTML"] }"#).unwrap();

        let config = ScanConfig::load(&path).unwrap();
        assert_eq!(config.max_file_size_mb, 2);
        assert!(config.includes_extension("html"));
        assert!(!config.includes_extension("js"));
        assert_eq!(config.snippet_max_length, DEFAULT_SNIPPET_MAX_LENGTH);
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = ScanConfig::load(Path::new("/definitely/not/here.json")).unwrap();
        assert_eq!(config.max_file_size_mb, DEFAULT_MAX_FILE_SIZE_MB);
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reposcan.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ScanConfig::load(&path), Err(ScanError::Config { .. })));
    }
}
