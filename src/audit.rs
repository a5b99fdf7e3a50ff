//! Extraction phase driver: walk, extract, classify, persist.
//!
//! Files are processed independently on a rayon pool; each worker owns its
//! own markup parser and shares the read-only catalogue.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::artifacts::{
    case_collisions, ArtifactWriter, BlockRecord, RunSummary, ScriptFileSummary, BLOCKS_FILE,
    EXTERNAL_CALLS_FILE, INLINE_STYLES_FILE, REFERENCES_FILE,
};
use crate::classify::{classify, detect_calls, server_severity, triggering_capabilities, Catalogue};
use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::extract::common::preview;
use crate::extract::{BlockExtractor, ExternalReference, FileKind, InlineStyle};
use crate::provenance::ProvenanceId;
use crate::source::read_source;
use crate::{scan_project, FileEntry};

/// Everything one audit run produced.
#[derive(Debug, Default)]
pub struct AuditReport {
    pub records: Vec<BlockRecord>,
    pub references: Vec<ExternalReference>,
    pub inline_styles: Vec<InlineStyle>,
    pub script_files: Vec<ScriptFileSummary>,
    pub summary: RunSummary,
}

/// Result of auditing a single file.
#[derive(Debug, Default)]
struct FileAudit {
    records: Vec<BlockRecord>,
    references: Vec<ExternalReference>,
    inline_styles: Vec<InlineStyle>,
    script_file: Option<ScriptFileSummary>,
}

/// Walk the configured root, audit every selected file and write the
/// artifacts to the output folder.
pub fn run_audit(config: &ScanConfig) -> Result<AuditReport> {
    config.validate()?;
    let start = Instant::now();

    let scan = scan_project(config)?;
    info!(
        "Auditing {} files under {} ({} skipped by the walk)",
        scan.files.len(),
        config.root_folder.display(),
        scan.skipped.len()
    );

    let catalogue = Catalogue::new().map_err(|e| ScanError::Parser(e.to_string()))?;
    let mut report = audit_files(&scan.files, config, &catalogue)?;
    report.summary.files_skipped += scan.skipped.len();
    report.summary.warnings.extend(
        scan.skipped
            .iter()
            .map(|s| format!("{}: {}", s.relative_path, s.reason)),
    );

    write_artifacts(&mut report, config)?;
    info!(
        "Audit complete in {:.1}s: {} blocks in {} files, {} skipped",
        start.elapsed().as_secs_f64(),
        report.summary.blocks,
        report.summary.files_scanned,
        report.summary.files_skipped
    );
    Ok(report)
}

/// Audit a list of files in parallel. Unreadable files become warnings; only
/// a missing markup grammar aborts.
pub fn audit_files(files: &[FileEntry], config: &ScanConfig, catalogue: &Catalogue) -> Result<AuditReport> {
    // Fail fast, before any worker starts, if the grammar cannot load.
    BlockExtractor::new()?;

    let warnings: Mutex<Vec<String>> = Mutex::new(Vec::new());
    let work = || {
        files
            .par_iter()
            .map_init(BlockExtractor::new, |extractor, entry| {
                let extractor = match extractor {
                    Ok(extractor) => extractor,
                    Err(e) => return Err(ScanError::Parser(e.to_string())),
                };
                match audit_file(extractor, entry, config, catalogue) {
                    Ok(audit) => Ok(Some(audit)),
                    Err(e) if !e.is_fatal() => {
                        warn!("Skipping {}: {}", entry.relative_path, e);
                        if let Ok(mut w) = warnings.lock() {
                            w.push(format!("{}: {}", entry.relative_path, e));
                        }
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .collect::<Result<Vec<Option<FileAudit>>>>()
    };

    let outcomes = if config.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()
            .map_err(|e| ScanError::Config {
                path: config.root_folder.clone(),
                reason: e.to_string(),
            })?
            .install(work)?
    } else {
        work()?
    };

    let mut report = AuditReport::default();
    for outcome in outcomes {
        let Some(audit) = outcome else {
            report.summary.files_skipped += 1;
            continue;
        };
        report.summary.files_scanned += 1;
        report.records.extend(audit.records);
        report.references.extend(audit.references);
        report.inline_styles.extend(audit.inline_styles);
        report.script_files.extend(audit.script_file);
    }

    report.summary.warnings = warnings.into_inner().unwrap_or_default();
    summarize(&mut report);
    Ok(report)
}

fn audit_file(
    extractor: &mut BlockExtractor,
    entry: &FileEntry,
    config: &ScanConfig,
    catalogue: &Catalogue,
) -> Result<FileAudit> {
    let source = read_source(&entry.path, config.max_file_size_bytes())?;
    debug!("{}: decoded as {}", entry.relative_path, source.encoding_name());

    let extraction = extractor.extract(&entry.relative_path, &source.text, entry.kind);

    let records = extraction
        .blocks
        .into_iter()
        .map(|block| {
            let calls = if block.kind.is_script() {
                detect_calls(&block.raw_text, block.start_line, catalogue)
            } else {
                Vec::new()
            };
            let classification = classify(&block, &calls, catalogue);
            debug!(
                "{}:{}-{} {:?} -> {:?}",
                block.source_path,
                block.start_line,
                block.end_line,
                block.kind,
                classification.safety_verdict
            );
            BlockRecord {
                provenance_id: ProvenanceId::for_block(&block),
                preview: preview(&block.raw_text, config.snippet_max_length),
                block,
                classification,
                ajax_calls: calls,
                extraction_failed: false,
            }
        })
        .collect();

    let script_file = (entry.kind == FileKind::Script)
        .then(|| summarize_script_file(&entry.relative_path, &source.text, catalogue))
        .flatten();

    Ok(FileAudit {
        records,
        references: extraction.references,
        inline_styles: extraction.inline_styles,
        script_file,
    })
}

/// Whole-file network-call summary for a standalone script.
fn summarize_script_file(relative_path: &str, text: &str, catalogue: &Catalogue) -> Option<ScriptFileSummary> {
    let calls = detect_calls(text, 1, catalogue);
    if calls.is_empty() {
        return None;
    }
    Some(ScriptFileSummary {
        source_path: relative_path.to_string(),
        request_count: calls.iter().filter(|c| c.is_triggering).count(),
        capabilities: triggering_capabilities(&calls),
        server_severity: server_severity(text, catalogue).0,
        calls,
    })
}

fn summarize(report: &mut AuditReport) {
    let mut by_kind = BTreeMap::new();
    let mut by_verdict = BTreeMap::new();
    for record in &report.records {
        *by_kind.entry(record.block.kind.tag().to_string()).or_insert(0) += 1;
        *by_verdict
            .entry(format!("{:?}", record.classification.safety_verdict))
            .or_insert(0) += 1;
    }
    report.summary.blocks = report.records.len();
    report.summary.by_kind = by_kind;
    report.summary.by_verdict = by_verdict;
    report.summary.references = report.references.len();
    report.summary.inline_styles = report.inline_styles.len();
    report.summary.script_files_with_calls = report.script_files.len();
}

/// Persist every artifact. A block whose extracted file cannot be written
/// (for example a name over the filesystem limit) is flagged and reported;
/// the run goes on.
fn write_artifacts(report: &mut AuditReport, config: &ScanConfig) -> Result<()> {
    let writer = ArtifactWriter::create(&config.output_folder)?;
    for record in report.records.iter_mut() {
        if let Err(e) = writer.write_extracted(record) {
            warn!("{}: extracted file not written: {}", record.provenance_id, e);
            record.extraction_failed = true;
            report
                .summary
                .warnings
                .push(format!("{}: extracted file not written: {}", record.provenance_id, e));
        }
    }
    for collision in case_collisions(&report.records) {
        warn!("{}", collision);
        report.summary.warnings.push(collision);
    }
    report.summary.extraction_failures = report.records.iter().filter(|r| r.extraction_failed).count();

    writer.write_records(BLOCKS_FILE, &report.records)?;
    writer.write_records(REFERENCES_FILE, &report.references)?;
    writer.write_records(EXTERNAL_CALLS_FILE, &report.script_files)?;
    writer.write_records(INLINE_STYLES_FILE, &report.inline_styles)?;
    writer.write_summary(&report.summary)?;
    info!("Artifacts written to {}", writer.root().display());
    Ok(())
}
