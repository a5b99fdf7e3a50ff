//! Extraction artifacts: the handoff between the audit and refactor phases.
//!
//! ```text
//! {output}/
//! ├── blocks.jsonl          - one BlockRecord per block
//! ├── references.jsonl      - external script/stylesheet references
//! ├── external_calls.jsonl  - per-script-file network call summaries
//! ├── inline_styles.jsonl   - inline style attributes (inventory only)
//! ├── summary.json          - run counts and warnings
//! └── extracted/
//!     ├── js/{id}.js
//!     └── css/{id}.css
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::classify::{Capability, ClassificationResult, DetectedCall, ServerSeverity};
use crate::error::{Result, ScanError};
use crate::extract::CodeBlock;
use crate::provenance::ProvenanceId;

pub const BLOCKS_FILE: &str = "blocks.jsonl";
pub const REFERENCES_FILE: &str = "references.jsonl";
pub const EXTERNAL_CALLS_FILE: &str = "external_calls.jsonl";
pub const INLINE_STYLES_FILE: &str = "inline_styles.jsonl";
pub const SUMMARY_FILE: &str = "summary.json";
pub const EXTRACTED_DIR: &str = "extracted";

// ============ Records ============

/// One persisted block: every CodeBlock and ClassificationResult field plus
/// the provenance id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub provenance_id: ProvenanceId,
    #[serde(flatten)]
    pub block: CodeBlock,
    #[serde(flatten)]
    pub classification: ClassificationResult,
    #[serde(default)]
    pub ajax_calls: Vec<DetectedCall>,
    /// One-line, length-capped view of the code for report tables.
    #[serde(default)]
    pub preview: String,
    /// Set when `extracted/{ext}/{id}.{ext}` could not be written.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub extraction_failed: bool,
}

/// Network activity of one standalone script file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptFileSummary {
    pub source_path: String,
    pub request_count: usize,
    pub capabilities: Vec<Capability>,
    pub server_severity: ServerSeverity,
    pub calls: Vec<DetectedCall>,
}

/// Totals for one extraction run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub blocks: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_verdict: BTreeMap<String, usize>,
    pub references: usize,
    #[serde(default)]
    pub inline_styles: usize,
    /// Blocks whose extracted file could not be written.
    #[serde(default)]
    pub extraction_failures: usize,
    pub script_files_with_calls: usize,
    pub warnings: Vec<String>,
}

// ============ Writing ============

/// Writes every artifact under one output folder.
pub struct ArtifactWriter {
    root: PathBuf,
}

impl ArtifactWriter {
    pub fn create(root: &Path) -> Result<Self> {
        fs::create_dir_all(root.join(EXTRACTED_DIR).join("js"))?;
        fs::create_dir_all(root.join(EXTRACTED_DIR).join("css"))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the extracted file for a record.
    pub fn extracted_path(&self, record: &BlockRecord) -> PathBuf {
        let kind = record.block.kind;
        self.root
            .join(EXTRACTED_DIR)
            .join(kind.extension())
            .join(record.provenance_id.file_name(kind))
    }

    /// Store a block's code as its own file, surrounding whitespace trimmed.
    pub fn write_extracted(&self, record: &BlockRecord) -> Result<PathBuf> {
        let path = self.extracted_path(record);
        fs::write(&path, record.block.raw_text.trim())?;
        Ok(path)
    }

    pub fn write_records<T: Serialize>(&self, file_name: &str, records: &[T]) -> Result<PathBuf> {
        let path = self.root.join(file_name);
        write_jsonl(&path, records)?;
        Ok(path)
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<PathBuf> {
        let path = self.root.join(SUMMARY_FILE);
        let mut writer = BufWriter::new(fs::File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, summary).map_err(io::Error::from)?;
        writer.flush()?;
        Ok(path)
    }
}

/// Write one JSON object per line. Goes through a sibling temp file so a
/// reader never sees a half-written artifact.
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let tmp = path.with_extension("jsonl.tmp");
    {
        let file = fs::File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            serde_json::to_writer(&mut writer, record).map_err(io::Error::from)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

// ============ Reading ============

/// Read a JSONL artifact. Blank lines are skipped; a bad line fails with its
/// 1-based line number.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = fs::File::open(path).map_err(|e| ScanError::read(path, e))?;
    let reader = io::BufReader::new(file);
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| ScanError::read(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| ScanError::Records {
            path: path.to_path_buf(),
            line: idx + 1,
            reason: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Extracted file names that only differ by letter case. They name the same
/// file on case-insensitive filesystems.
pub fn case_collisions(records: &[BlockRecord]) -> Vec<String> {
    let mut seen: BTreeMap<String, &ProvenanceId> = BTreeMap::new();
    let mut out = Vec::new();
    for record in records {
        let name = record.provenance_id.file_name(record.block.kind);
        match seen.get(&name.to_lowercase()) {
            Some(first) if first.as_str() != record.provenance_id.as_str() => out.push(format!(
                "{} and {} differ only by case and collide on case-insensitive filesystems",
                first, record.provenance_id
            )),
            Some(_) => {}
            None => {
                seen.insert(name.to_lowercase(), &record.provenance_id);
            }
        }
    }
    out
}

pub fn read_block_records(output_dir: &Path) -> Result<Vec<BlockRecord>> {
    read_jsonl(&output_dir.join(BLOCKS_FILE))
}
