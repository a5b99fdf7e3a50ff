//! Per-file edit planning: integrity check, action choice, conflict
//! resolution, and application in descending position order.

use std::ops::Range;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::artifacts::BlockRecord;
use crate::classify::SafetyVerdict;
use crate::config::RefactorConfig;
use crate::extract::common::{indentation, LineIndex};
use crate::extract::{BlockKind, CodeBlock, Extraction, FileKind};
use crate::provenance::{BlockKey, ProvenanceId};

// ============ Inputs and Outcomes ============

/// What the refactoring engine needs from one extraction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefactorEntry {
    pub id: ProvenanceId,
    pub verdict: SafetyVerdict,
    /// Original block text, checked against the destination when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    /// Human-readable reason used in annotations.
    #[serde(default)]
    pub reason: String,
    /// No extracted file exists to reference.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub extracted_missing: bool,
}

impl From<&BlockRecord> for RefactorEntry {
    fn from(record: &BlockRecord) -> Self {
        Self {
            id: record.provenance_id.clone(),
            verdict: record.classification.safety_verdict,
            raw_text: Some(record.block.raw_text.clone()),
            reason: record.classification.rationale.clone(),
            extracted_missing: record.extraction_failed,
        }
    }
}

/// Action chosen for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Substitute { reference: String },
    Annotate { reason: String },
}

/// What happened to one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome")]
pub enum BlockOutcome {
    Substituted { reference: String },
    Annotated { reason: String },
    SkippedLineMismatch { detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub provenance_id: ProvenanceId,
    pub source_path: String,
    pub kind: BlockKind,
    pub start_line: usize,
    pub end_line: usize,
    #[serde(flatten)]
    pub outcome: BlockOutcome,
}

impl OutcomeRecord {
    pub fn new(key: &BlockKey, id: &ProvenanceId, outcome: BlockOutcome) -> Self {
        Self {
            provenance_id: id.clone(),
            source_path: key.source_path.clone(),
            kind: key.kind,
            start_line: key.start_line,
            end_line: key.end_line,
            outcome,
        }
    }
}

// ============ Integrity Check ============

/// Find the block an entry points at in freshly extracted content. Kind and
/// both boundaries must match exactly, and the text too when recorded.
pub fn check_integrity<'a>(
    extraction: &'a Extraction,
    key: &BlockKey,
    expected_text: Option<&str>,
) -> Result<&'a CodeBlock, String> {
    let block = extraction
        .find(key.kind, key.start_line, key.end_line)
        .ok_or_else(|| {
            let moved = extraction
                .blocks
                .iter()
                .find(|b| b.kind == key.kind && b.start_line == key.start_line);
            match moved {
                Some(b) => format!(
                    "{} block at line {} now ends at line {} instead of {}",
                    key.kind.tag(),
                    key.start_line,
                    b.end_line,
                    key.end_line
                ),
                None => format!(
                    "no {} block at lines {}-{}",
                    key.kind.tag(),
                    key.start_line,
                    key.end_line
                ),
            }
        })?;

    if let Some(expected) = expected_text {
        if block.raw_text != expected {
            return Err(format!(
                "{} block at lines {}-{} has different content",
                key.kind.tag(),
                key.start_line,
                key.end_line
            ));
        }
    }
    Ok(block)
}

// ============ Planning ============

/// Reference to the externally stored file for a block.
pub fn external_reference(id: &ProvenanceId, kind: BlockKind, config: &RefactorConfig) -> String {
    let base = match kind {
        BlockKind::StyleBlock => config.style_base.trim_end_matches('/'),
        _ => config.script_base.trim_end_matches('/'),
    };
    format!("{}/{}.{}", base, id.url_segment(), kind.extension())
}

fn reference_markup(kind: BlockKind, reference: &str) -> String {
    match kind {
        BlockKind::StyleBlock => format!("<link rel=\"stylesheet\" href=\"{}\" />", reference),
        _ => format!("<script src=\"{}\"></script>", reference),
    }
}

/// Choose an action from the verdict. Only closed, single script or style
/// elements can be swapped for a reference.
pub fn choose_action(
    entry: &RefactorEntry,
    block: &CodeBlock,
    config: &RefactorConfig,
) -> Action {
    match entry.verdict {
        SafetyVerdict::Ready if entry.extracted_missing => Action::Annotate {
            reason: "Ready, but its extracted file was not written; extract by hand".to_string(),
        },
        SafetyVerdict::Ready if block.kind.is_element() && block.locus.element.is_some() => {
            Action::Substitute {
                reference: external_reference(&entry.id, block.kind, config),
            }
        }
        SafetyVerdict::Ready if block.kind.is_element() => Action::Annotate {
            reason: "Ready, but the element is unclosed or merged; extract by hand".to_string(),
        },
        SafetyVerdict::Ready => Action::Annotate {
            reason: "Ready, but attribute code cannot reference an external file; move it to a script"
                .to_string(),
        },
        verdict => Action::Annotate {
            reason: format!("{:?}: {}", verdict, entry.reason),
        },
    }
}

#[derive(Debug, Clone)]
enum EditKind {
    Replace(Range<usize>),
    Insert(usize),
}

#[derive(Debug, Clone)]
struct Edit {
    kind: EditKind,
    text: String,
    /// Index into the planned list, for reporting.
    owner: usize,
}

impl Edit {
    fn position(&self) -> usize {
        match &self.kind {
            EditKind::Replace(range) => range.start,
            EditKind::Insert(offset) => *offset,
        }
    }
}

struct Planned<'a> {
    key: BlockKey,
    entry: &'a RefactorEntry,
    block: &'a CodeBlock,
    action: Action,
}

/// Plan and apply every entry for one file. Returns the new text and one
/// outcome per entry, in entry order.
pub fn apply_entries(
    text: &str,
    file_kind: FileKind,
    extraction: &Extraction,
    entries: &[(BlockKey, &RefactorEntry)],
    config: &RefactorConfig,
) -> (String, Vec<OutcomeRecord>) {
    let index = LineIndex::new(text);
    let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };

    let mut outcomes: Vec<Option<OutcomeRecord>> = vec![None; entries.len()];
    let mut planned: Vec<(usize, Planned<'_>)> = Vec::new();

    for (i, (key, entry)) in entries.iter().enumerate() {
        match check_integrity(extraction, key, entry.raw_text.as_deref()) {
            Ok(block) => planned.push((
                i,
                Planned {
                    key: key.clone(),
                    entry,
                    block,
                    action: choose_action(entry, block, config),
                },
            )),
            Err(detail) => {
                debug!("{}: skipped, {}", entry.id, detail);
                outcomes[i] = Some(OutcomeRecord::new(
                    key,
                    &entry.id,
                    BlockOutcome::SkippedLineMismatch { detail },
                ));
            }
        }
    }

    downgrade_conflicts(&mut planned, &index);

    let mut edits = Vec::new();
    for (i, plan) in &planned {
        match &plan.action {
            Action::Substitute { reference } => {
                if let Some(range) = plan.block.locus.element.clone() {
                    edits.push(Edit {
                        kind: EditKind::Replace(range),
                        text: reference_markup(plan.block.kind, reference),
                        owner: *i,
                    });
                }
            }
            Action::Annotate { reason } => {
                let anchor = plan.block.anchor_line();
                let offset = index.line_start(anchor).unwrap_or(0);
                let line_end = index.line_end(anchor).unwrap_or(text.len());
                let indent = indentation(&text[offset..line_end]);
                let body = format!("{}: {} {}", config.annotation_prefix, plan.entry.id, reason);
                edits.push(Edit {
                    kind: EditKind::Insert(offset),
                    text: format!("{}{}{}", indent, file_kind.comment(&body), newline),
                    owner: *i,
                });
            }
        }
        let outcome = match &plan.action {
            Action::Substitute { reference } => BlockOutcome::Substituted {
                reference: reference.clone(),
            },
            Action::Annotate { reason } => BlockOutcome::Annotated {
                reason: reason.clone(),
            },
        };
        outcomes[*i] = Some(OutcomeRecord::new(&plan.key, &plan.entry.id, outcome));
    }

    // Descending position; at equal positions the replacement goes first so
    // an annotation inserted at the same offset lands above it.
    edits.sort_by(|a, b| {
        b.position()
            .cmp(&a.position())
            .then_with(|| {
                let rank = |e: &Edit| matches!(e.kind, EditKind::Insert(_)) as u8;
                rank(a).cmp(&rank(b))
            })
            .then(b.owner.cmp(&a.owner))
    });

    let mut out = text.to_string();
    for edit in edits {
        match edit.kind {
            EditKind::Replace(range) => out.replace_range(range, &edit.text),
            EditKind::Insert(offset) => out.insert_str(offset, &edit.text),
        }
    }

    (out, outcomes.into_iter().flatten().collect())
}

/// A substitution whose element range would swallow another block's edit
/// point, or overlap another substitution, becomes an annotation.
fn downgrade_conflicts(planned: &mut [(usize, Planned<'_>)], index: &LineIndex) {
    let edit_points: Vec<(usize, Range<usize>)> = planned
        .iter()
        .map(|(i, p)| {
            let span = match (&p.action, &p.block.locus.element) {
                (Action::Substitute { .. }, Some(range)) => range.clone(),
                _ => {
                    let at = index.line_start(p.block.anchor_line()).unwrap_or(0);
                    at..at
                }
            };
            (*i, span)
        })
        .collect();

    for (i, plan) in planned.iter_mut() {
        let Action::Substitute { .. } = plan.action else {
            continue;
        };
        let Some(range) = plan.block.locus.element.clone() else {
            continue;
        };
        let clash = edit_points.iter().any(|(j, other)| {
            *j != *i
                && if other.is_empty() {
                    range.start < other.start && other.start < range.end
                } else {
                    range.start < other.end && other.start < range.end
                }
        });
        if clash {
            debug!("{}: substitution conflicts with another edit", plan.entry.id);
            plan.action = Action::Annotate {
                reason: "Ready, but another block's edit falls inside this element; extract by hand"
                    .to_string(),
            };
        }
    }
}
