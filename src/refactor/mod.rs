//! Refactoring engine: applies substitutions and annotations to an isolated
//! copy of the source tree.
//!
//! ## Architecture
//!
//! ```text
//! refactor/
//! ├── mod.rs   - Run orchestration, verify mode, reports
//! ├── plan.rs  - Integrity check, action choice, edit application
//! └── tree.rs  - Destination validation, copy, cleanup
//! ```
//!
//! The source tree is only ever read. Every edit happens in the destination,
//! which is removed again if a write fails partway.

pub mod plan;
pub mod tree;

use std::collections::BTreeMap;
use std::path::Path;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::RefactorConfig;
use crate::error::{Result, ScanError};
use crate::extract::{BlockExtractor, FileKind};
use crate::provenance::{BlockKey, ProvenanceId};
use crate::source::{read_source, write_source};

pub use plan::{apply_entries, check_integrity, BlockOutcome, OutcomeRecord, RefactorEntry};

/// An entry whose id did not decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedEntry {
    pub provenance_id: ProvenanceId,
    pub reason: String,
}

/// Per-block outcome log for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefactorReport {
    pub outcomes: Vec<OutcomeRecord>,
    pub rejected: Vec<RejectedEntry>,
    pub files_copied: usize,
    pub files_rewritten: usize,
    pub substituted: usize,
    pub annotated: usize,
    pub skipped_line_mismatch: usize,
}

impl RefactorReport {
    fn tally(&mut self) {
        self.outcomes.sort_by(|a, b| {
            (&a.source_path, a.start_line, a.kind).cmp(&(&b.source_path, b.start_line, b.kind))
        });
        self.substituted = 0;
        self.annotated = 0;
        self.skipped_line_mismatch = 0;
        for record in &self.outcomes {
            match record.outcome {
                BlockOutcome::Substituted { .. } => self.substituted += 1,
                BlockOutcome::Annotated { .. } => self.annotated += 1,
                BlockOutcome::SkippedLineMismatch { .. } => self.skipped_line_mismatch += 1,
            }
        }
    }
}

type FileGroups<'a> = BTreeMap<String, Vec<(BlockKey, &'a RefactorEntry)>>;

/// Decode every id and group the entries by source file. Undecodable ids
/// and repeats of an already seen key are rejected.
fn group_entries(entries: &[RefactorEntry]) -> (FileGroups<'_>, Vec<RejectedEntry>) {
    let mut groups: FileGroups = BTreeMap::new();
    let mut rejected = Vec::new();
    for entry in entries {
        match entry.id.decode() {
            Ok(key) => {
                let group = groups.entry(key.source_path.clone()).or_default();
                if group.iter().any(|(k, _)| *k == key) {
                    rejected.push(RejectedEntry {
                        provenance_id: entry.id.clone(),
                        reason: "duplicate entry".to_string(),
                    });
                } else {
                    group.push((key, entry));
                }
            }
            Err(e) => {
                warn!("{}", e);
                rejected.push(RejectedEntry {
                    provenance_id: entry.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    (groups, rejected)
}

/// Every entry in a group fails the same way.
fn skip_all(group: &[(BlockKey, &RefactorEntry)], detail: &str) -> Vec<OutcomeRecord> {
    group
        .iter()
        .map(|(key, entry)| {
            OutcomeRecord::new(
                key,
                &entry.id,
                BlockOutcome::SkippedLineMismatch {
                    detail: detail.to_string(),
                },
            )
        })
        .collect()
}

/// One file's pass in the destination: load once, apply, write once.
/// Only a failed write is an error.
fn refactor_file(
    extractor: &mut BlockExtractor,
    destination: &Path,
    source_path: &str,
    group: &[(BlockKey, &RefactorEntry)],
    config: &RefactorConfig,
) -> Result<(Vec<OutcomeRecord>, bool)> {
    let Some(path) = tree::contained_path(destination, source_path) else {
        return Ok((skip_all(group, "path escapes the tree"), false));
    };
    let Some(file_kind) = FileKind::from_path(&path) else {
        return Ok((skip_all(group, "unsupported file type"), false));
    };
    let source = match read_source(&path, u64::MAX) {
        Ok(source) => source,
        Err(e) => return Ok((skip_all(group, &format!("file unavailable: {}", e)), false)),
    };

    let extraction = extractor.extract(source_path, &source.text, file_kind);
    let (text, outcomes) = apply_entries(&source.text, file_kind, &extraction, group, config);

    if text == source.text {
        return Ok((outcomes, false));
    }
    write_source(&path, &source, &text).map_err(|e| ScanError::PartialWriteFailure {
        path: path.clone(),
        source: e,
    })?;
    debug!("rewrote {}", path.display());
    Ok((outcomes, true))
}

/// Copy `source_root` to `destination` and apply every entry there.
///
/// Fails without leaving anything behind when the destination is unusable,
/// the copy fails, or a write fails. Line mismatches and bad ids are only
/// recorded in the report.
pub fn refactor_tree(
    source_root: &Path,
    destination: &Path,
    entries: &[RefactorEntry],
    config: &RefactorConfig,
) -> Result<RefactorReport> {
    let existed = tree::prepare_destination(source_root, destination)?;
    // Fail before copying if the grammar cannot load.
    BlockExtractor::new()?;

    let (groups, rejected) = group_entries(entries);
    info!(
        "Refactoring {} blocks across {} files into {}",
        groups.values().map(Vec::len).sum::<usize>(),
        groups.len(),
        destination.display()
    );

    let files_copied = match tree::copy_tree(source_root, destination) {
        Ok(n) => n,
        Err(e) => {
            tree::cleanup_destination(destination, existed);
            return Err(e);
        }
    };

    let groups: Vec<(&String, &Vec<(BlockKey, &RefactorEntry)>)> = groups.iter().collect();
    let work = || {
        groups
            .par_iter()
            .map_init(BlockExtractor::new, |extractor, (source_path, group)| {
                let extractor = match extractor {
                    Ok(extractor) => extractor,
                    Err(e) => return Err(ScanError::Parser(e.to_string())),
                };
                refactor_file(extractor, destination, source_path, group, config)
            })
            .collect::<Vec<Result<(Vec<OutcomeRecord>, bool)>>>()
    };

    let results = if config.threads > 0 {
        match rayon::ThreadPoolBuilder::new().num_threads(config.threads).build() {
            Ok(pool) => pool.install(work),
            Err(e) => {
                tree::cleanup_destination(destination, existed);
                return Err(ScanError::Config {
                    path: destination.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    } else {
        work()
    };

    let mut report = RefactorReport {
        rejected,
        files_copied,
        ..RefactorReport::default()
    };
    for result in results {
        match result {
            Ok((outcomes, rewritten)) => {
                report.outcomes.extend(outcomes);
                report.files_rewritten += rewritten as usize;
            }
            Err(e) => {
                warn!("Aborting refactor: {}", e);
                tree::cleanup_destination(destination, existed);
                return Err(e);
            }
        }
    }

    report.tally();
    for record in &report.outcomes {
        if let BlockOutcome::SkippedLineMismatch { detail } = &record.outcome {
            warn!(
                "{}",
                ScanError::LineMismatch {
                    id: record.provenance_id.to_string(),
                    detail: detail.clone(),
                }
            );
        }
    }
    info!(
        "Refactor complete: {} substituted, {} annotated, {} skipped (line mismatch), {} rejected",
        report.substituted,
        report.annotated,
        report.skipped_line_mismatch,
        report.rejected.len()
    );
    Ok(report)
}

// ============ Verify ============

/// Whether a recorded block is still where the record says.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum VerifyStatus {
    Intact,
    LineMismatch { detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRecord {
    pub provenance_id: ProvenanceId,
    #[serde(flatten)]
    pub status: VerifyStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub records: Vec<VerifyRecord>,
    pub rejected: Vec<RejectedEntry>,
    pub intact: usize,
    pub mismatched: usize,
}

/// Check every entry against `root` without writing anything, using the
/// same integrity check as [`refactor_tree`].
pub fn verify_tree(root: &Path, entries: &[RefactorEntry]) -> Result<VerifyReport> {
    let (groups, rejected) = group_entries(entries);
    let groups: Vec<(&String, &Vec<(BlockKey, &RefactorEntry)>)> = groups.iter().collect();

    let per_file = groups
        .par_iter()
        .map_init(BlockExtractor::new, |extractor, (source_path, group)| {
            let extractor = match extractor {
                Ok(extractor) => extractor,
                Err(e) => return Err(ScanError::Parser(e.to_string())),
            };
            Ok(verify_file(extractor, root, source_path, group))
        })
        .collect::<Result<Vec<Vec<VerifyRecord>>>>()?;

    let mut report = VerifyReport {
        rejected,
        ..VerifyReport::default()
    };
    for record in per_file.into_iter().flatten() {
        match record.status {
            VerifyStatus::Intact => report.intact += 1,
            VerifyStatus::LineMismatch { .. } => report.mismatched += 1,
        }
        report.records.push(record);
    }
    info!(
        "Verify: {} intact, {} mismatched, {} rejected",
        report.intact,
        report.mismatched,
        report.rejected.len()
    );
    Ok(report)
}

fn verify_file(
    extractor: &mut BlockExtractor,
    root: &Path,
    source_path: &str,
    group: &[(BlockKey, &RefactorEntry)],
) -> Vec<VerifyRecord> {
    let loaded = tree::contained_path(root, source_path)
        .ok_or_else(|| "path escapes the tree".to_string())
        .and_then(|path| {
            let kind = FileKind::from_path(&path).ok_or_else(|| "unsupported file type".to_string())?;
            let source = read_source(&path, u64::MAX).map_err(|e| format!("file unavailable: {}", e))?;
            Ok(extractor.extract(source_path, &source.text, kind))
        });

    group
        .iter()
        .map(|(key, entry)| {
            let status = match &loaded {
                Ok(extraction) => match check_integrity(extraction, key, entry.raw_text.as_deref()) {
                    Ok(_) => VerifyStatus::Intact,
                    Err(detail) => VerifyStatus::LineMismatch { detail },
                },
                Err(detail) => VerifyStatus::LineMismatch {
                    detail: detail.clone(),
                },
            };
            VerifyRecord {
                provenance_id: entry.id.clone(),
                status,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::SafetyVerdict;
    use crate::extract::BlockKind;
    use std::fs;

    fn entry(path: &str, kind: BlockKind, start: usize, end: usize, verdict: SafetyVerdict) -> RefactorEntry {
        RefactorEntry {
            id: ProvenanceId::encode(&BlockKey {
                source_path: path.to_string(),
                kind,
                start_line: start,
                end_line: end,
            }),
            verdict,
            raw_text: None,
            reason: "reason".to_string(),
            extracted_missing: false,
        }
    }

    #[test]
    fn test_rejects_bad_and_duplicate_ids() {
        let good = entry("a.html", BlockKind::ScriptBlock, 1, 1, SafetyVerdict::Ready);
        let entries = vec![
            good.clone(),
            good,
            RefactorEntry {
                id: ProvenanceId::from_raw("nonsense"),
                verdict: SafetyVerdict::Ready,
                raw_text: None,
                reason: String::new(),
                extracted_missing: false,
            },
        ];
        let (groups, rejected) = group_entries(&entries);
        assert_eq!(groups.len(), 1);
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].reason, "duplicate entry");
    }

    #[test]
    fn test_missing_file_is_mismatch() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("dest");
        fs::write(src.path().join("a.html"), "<script>a()</script>\n").unwrap();

        let entries = vec![entry("gone.html", BlockKind::ScriptBlock, 1, 1, SafetyVerdict::Ready)];
        let report = refactor_tree(src.path(), &dest, &entries, &RefactorConfig::default()).unwrap();
        assert_eq!(report.skipped_line_mismatch, 1);
        assert_eq!(report.files_copied, 1);
        assert_eq!(fs::read_to_string(dest.join("a.html")).unwrap(), "<script>a()</script>\n");
    }

    #[test]
    fn test_verify_reports_intact_and_moved() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("a.html"), "<p>\n<script>a()</script>\n").unwrap();
        let entries = vec![
            entry("a.html", BlockKind::ScriptBlock, 2, 2, SafetyVerdict::Ready),
            entry("a.html", BlockKind::ScriptBlock, 1, 1, SafetyVerdict::Ready),
        ];
        let report = verify_tree(root.path(), &entries).unwrap();
        assert_eq!(report.intact, 1);
        assert_eq!(report.mismatched, 1);
    }
}
