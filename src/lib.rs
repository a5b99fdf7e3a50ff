use std::path::{Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

pub mod artifacts;
pub mod audit;
pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod provenance;
pub mod refactor;
pub mod source;


pub use audit::{run_audit, AuditReport};
pub use config::{RefactorConfig, ScanConfig};
pub use error::{Result, ScanError};
pub use extract::{BlockExtractor, BlockKind, CodeBlock, FileKind};
pub use provenance::{BlockKey, ProvenanceId};
pub use refactor::{refactor_tree, verify_tree, RefactorReport};

/// A file selected for auditing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Relative to the scanned root, `/`-separated.
    pub relative_path: String,
    pub size: u64,
    pub kind: FileKind,
}

/// A file the walk found but will not audit.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub relative_path: String,
    pub reason: String,
}

#[derive(Debug, Default, Clone)]
pub struct ProjectScan {
    pub files: Vec<FileEntry>,
    pub skipped: Vec<SkippedFile>,
}

/// Relative `/`-separated path of `path` under `root`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Walk the root and pick the files to audit: included extensions only,
/// excluded folders pruned, excluded file globs and oversized files skipped.
pub fn scan_project(config: &ScanConfig) -> Result<ProjectScan> {
    let root_path = config.root_folder.as_path();
    if !root_path.is_dir() {
        return Err(ScanError::Config {
            path: root_path.to_path_buf(),
            reason: "Path does not exist".to_string(),
        });
    }

    let mut overrides = OverrideBuilder::new(root_path);
    for glob in &config.exclude_files {
        overrides
            .add(&format!("!{}", glob))
            .map_err(|e| ScanError::Config {
                path: root_path.to_path_buf(),
                reason: format!("bad exclude pattern {:?}: {}", glob, e),
            })?;
    }
    let overrides = overrides.build().map_err(|e| ScanError::Config {
        path: root_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let excluded = config.exclude_folders.clone();
    // Artifacts from an earlier run must never be audited as source.
    let output = config.output_folder.canonicalize().ok();
    let walker = WalkBuilder::new(root_path)
        .standard_filters(true)
        .overrides(overrides)
        .filter_entry(move |entry| {
            if !entry.file_type().is_some_and(|t| t.is_dir()) {
                return true;
            }
            if excluded.contains(entry.file_name().to_string_lossy().as_ref()) {
                return false;
            }
            output.is_none() || entry.path().canonicalize().ok() != output
        })
        .build();

    let max_bytes = config.max_file_size_bytes();
    let mut scan = ProjectScan::default();

    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Error walking path: {}", err);
                continue;
            }
        };
        let p = entry.path();
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Some(relative) = relative_path(root_path, p) else {
            continue;
        };

        let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
        let kind = match FileKind::from_extension(ext) {
            Some(kind) if config.includes_extension(ext) => kind,
            _ => continue,
        };

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > max_bytes {
            warn!("Skipping {} ({} bytes exceeds {} bytes)", relative, size, max_bytes);
            scan.skipped.push(SkippedFile {
                relative_path: relative,
                reason: format!("{} bytes exceeds the {} MB ceiling", size, config.max_file_size_mb),
            });
            continue;
        }

        debug!("selected {}", relative);
        scan.files.push(FileEntry {
            path: p.to_path_buf(),
            relative_path: relative,
            size,
            kind,
        });
    }

    scan.files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    scan.skipped.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_filters() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Views/Home")).unwrap();
        fs::create_dir_all(root.join("node_modules/lib")).unwrap();
        fs::create_dir_all(root.join("Scripts")).unwrap();
        fs::write(root.join("Views/Home/Index.cshtml"), "<p>hi</p>").unwrap();
        fs::write(root.join("node_modules/lib/index.html"), "<p></p>").unwrap();
        fs::write(root.join("Scripts/site.js"), "init();").unwrap();
        fs::write(root.join("Scripts/jquery.min.js"), "x").unwrap();
        fs::write(root.join("logo.png"), [0u8; 4]).unwrap();

        let config = ScanConfig {
            root_folder: root.to_path_buf(),
            ..ScanConfig::default()
        };
        let scan = scan_project(&config).unwrap();
        let paths: Vec<&str> = scan.files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["Scripts/site.js", "Views/Home/Index.cshtml"]);
        assert_eq!(scan.files[0].kind, FileKind::Script);
        assert_eq!(scan.files[1].kind, FileKind::Markup);
    }

    #[test]
    fn test_oversized_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("big.html"), vec![b'a'; 2 * 1024 * 1024]).unwrap();
        let config = ScanConfig {
            root_folder: dir.path().to_path_buf(),
            max_file_size_mb: 1,
            ..ScanConfig::default()
        };
        let scan = scan_project(&config).unwrap();
        assert!(scan.files.is_empty());
        assert_eq!(scan.skipped.len(), 1);
        assert_eq!(scan.skipped[0].relative_path, "big.html");
    }

    #[test]
    fn test_missing_root() {
        let config = ScanConfig {
            root_folder: PathBuf::from("/no/such/root"),
            ..ScanConfig::default()
        };
        assert!(matches!(scan_project(&config), Err(ScanError::Config { .. })));
    }
}
