//! Block extraction: a hybrid structural + pattern parser.
//!
//! ## Architecture
//!
//! ```text
//! extract/
//! ├── mod.rs      - Types, pass dispatch, candidate merge
//! ├── common.rs   - Handler tables, node positions, line index
//! ├── markup.rs   - Structural pass over the tree-sitter HTML tree
//! └── pattern.rs  - Line-by-line pattern pass over raw text
//! ```
//!
//! The structural pass only runs on markup files. The pattern pass runs on
//! everything, including server-templated markup the parser cannot model.
//! Both passes produce tagged [`Candidate`]s which are merged by an explicit
//! precedence rule: structural wins whenever spans overlap.

pub mod common;
pub mod markup;
pub mod pattern;

use std::ops::Range;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tree_sitter::Parser;

use crate::error::{Result, ScanError};

// ============ File Kinds ============

/// How a file is scanned, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    Markup,
    Script,
    Style,
}

impl FileKind {
    /// Detect the file kind from an extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "html" | "htm" | "xhtml" | "cshtml" | "vbhtml" | "razor" | "aspx" | "ascx"
            | "master" | "asp" | "php" | "jsp" => Some(Self::Markup),
            "js" | "mjs" | "cjs" => Some(Self::Script),
            "css" => Some(Self::Style),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Wrap `body` in this kind's single-line comment syntax.
    pub fn comment(&self, body: &str) -> String {
        let flat = body.replace(['\r', '\n'], " ");
        match self {
            Self::Markup => format!("<!-- {} -->", flat.replace("--", "- -")),
            Self::Script => format!("// {}", flat),
            Self::Style => format!("/* {} */", flat.replace("*/", "* /")),
        }
    }
}

// ============ Blocks ============

/// What kind of inline code a block holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockKind {
    ScriptBlock,
    StyleBlock,
    EventHandlerAttribute,
    PseudoProtocolUri,
}

impl BlockKind {
    pub const ALL: [BlockKind; 4] = [
        Self::ScriptBlock,
        Self::StyleBlock,
        Self::EventHandlerAttribute,
        Self::PseudoProtocolUri,
    ];

    /// Short tag used inside provenance ids.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ScriptBlock => "script",
            Self::StyleBlock => "style",
            Self::EventHandlerAttribute => "handler",
            Self::PseudoProtocolUri => "jsuri",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    /// Extension of the externally stored extracted file.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::StyleBlock => "css",
            _ => "js",
        }
    }

    /// Whether the block is a whole element rather than an attribute value.
    pub fn is_element(&self) -> bool {
        matches!(self, Self::ScriptBlock | Self::StyleBlock)
    }

    pub fn is_script(&self) -> bool {
        !matches!(self, Self::StyleBlock)
    }
}

/// Which pass found a block. Only used to settle duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Origin {
    StructuralMatch,
    PatternMatch,
}

/// Where a block sits in its file, beyond its line span. Never persisted:
/// the refactoring engine always re-extracts before editing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locus {
    /// Byte range of a closed, single element that can be swapped out.
    pub element: Option<Range<usize>>,
    /// Line above which an annotation can go without splitting a tag.
    pub anchor_line: usize,
}

/// A contiguous span of inline code found in one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Relative path in the original tree, `/`-separated.
    pub source_path: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub kind: BlockKind,
    /// Verbatim extracted content.
    pub raw_text: String,
    pub origin: Origin,
    /// Attribute that carried the code, for attribute-borne blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    #[serde(skip)]
    pub locus: Locus,
}

impl CodeBlock {
    pub fn overlaps(&self, other: &CodeBlock) -> bool {
        self.start_line <= other.end_line && other.start_line <= self.end_line
    }

    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }

    pub fn anchor_line(&self) -> usize {
        if self.locus.anchor_line == 0 {
            self.start_line
        } else {
            self.locus.anchor_line
        }
    }

    /// Fold a same-key block into this one.
    fn absorb(&mut self, other: CodeBlock) {
        let other_anchor = other.anchor_line();
        debug!(
            "coalescing {:?} blocks at {}:{}",
            self.kind, self.source_path, self.start_line
        );
        self.raw_text.push('\n');
        self.raw_text.push_str(&other.raw_text);
        self.end_line = self.end_line.max(other.end_line);
        self.attribute = match (self.attribute.take(), other.attribute) {
            (Some(a), Some(b)) if a != b => Some(format!("{},{}", a, b)),
            (a, b) => a.or(b),
        };
        self.locus.element = None;
        self.locus.anchor_line = self.anchor_line().min(other_anchor);
    }
}

/// A reference to an external script or stylesheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalReference {
    pub source_path: String,
    pub line: usize,
    pub kind: ReferenceKind,
    pub target: String,
    pub locality: Locality,
}

/// An inline `style="..."` attribute. Inventoried only: attribute styles have
/// no external-file form and are never relocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineStyle {
    pub source_path: String,
    pub line: usize,
    /// Tag carrying the attribute, as written.
    pub element: String,
    pub value: String,
    /// Value contains server template markup (`<% %>`, `<? ?>`, Razor `@`).
    pub server_templated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceKind {
    Script,
    Stylesheet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locality {
    Local,
    Remote,
}

// ============ Candidates ============

/// A span proposed by one of the two passes, before precedence is applied.
#[derive(Debug, Clone)]
pub enum Candidate {
    Structural(CodeBlock),
    Pattern(CodeBlock),
}

/// Apply the precedence rule and collapse same-key duplicates.
///
/// A pattern candidate is dropped when it overlaps a structural candidate of
/// the same kind or falls inside a structural script/style element. Overlap
/// counts, not only an equal start line, so off-by-one spans between the two
/// passes still collapse.
pub fn merge_candidates(candidates: Vec<Candidate>) -> Vec<CodeBlock> {
    let mut structural = Vec::new();
    let mut pattern = Vec::new();
    for candidate in candidates {
        match candidate {
            Candidate::Structural(block) => structural.push(block),
            Candidate::Pattern(block) => pattern.push(block),
        }
    }

    let survivors: Vec<CodeBlock> = pattern
        .into_iter()
        .filter(|p| {
            let shadow = structural
                .iter()
                .find(|s| s.overlaps(p) && (s.kind == p.kind || s.kind.is_element()));
            if let Some(s) = shadow {
                debug!(
                    "pattern match at {}:{} shadowed by structural {:?} {}-{}",
                    p.source_path, p.start_line, s.kind, s.start_line, s.end_line
                );
            }
            shadow.is_none()
        })
        .collect();

    structural.extend(survivors);
    coalesce(structural)
}

fn coalesce(mut blocks: Vec<CodeBlock>) -> Vec<CodeBlock> {
    blocks.sort_by(|a, b| {
        a.start_line
            .cmp(&b.start_line)
            .then(a.kind.cmp(&b.kind))
            .then(a.origin.cmp(&b.origin))
            .then(a.end_line.cmp(&b.end_line))
    });

    let mut out: Vec<CodeBlock> = Vec::with_capacity(blocks.len());
    for block in blocks {
        match out.last_mut() {
            Some(last) if last.kind == block.kind && last.start_line == block.start_line => {
                last.absorb(block)
            }
            _ => out.push(block),
        }
    }

    out.sort_by(|a, b| {
        a.start_line
            .cmp(&b.start_line)
            .then(a.end_line.cmp(&b.end_line))
            .then(a.kind.cmp(&b.kind))
    });
    out
}

// ============ Extractor ============

/// Everything found in one file.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Deduplicated and line-ordered.
    pub blocks: Vec<CodeBlock>,
    pub references: Vec<ExternalReference>,
    pub inline_styles: Vec<InlineStyle>,
}

impl Extraction {
    /// The block with exactly this kind and span, if still present.
    pub fn find(&self, kind: BlockKind, start_line: usize, end_line: usize) -> Option<&CodeBlock> {
        self.blocks
            .iter()
            .find(|b| b.kind == kind && b.start_line == start_line && b.end_line == end_line)
    }
}

/// Owns a markup parser. Not shareable across threads; create one per worker.
pub struct BlockExtractor {
    parser: Parser,
}

impl BlockExtractor {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_html::LANGUAGE.into())
            .map_err(|e| ScanError::Parser(e.to_string()))?;
        Ok(Self { parser })
    }

    /// Extract every inline block from one file's decoded text.
    pub fn extract(&mut self, source_path: &str, text: &str, file_kind: FileKind) -> Extraction {
        let mut candidates = Vec::new();
        let mut references = Vec::new();
        let mut inline_styles = Vec::new();

        if file_kind == FileKind::Markup {
            match self.parser.parse(text, None) {
                Some(tree) => {
                    let pass = markup::structural_pass(source_path, text, tree.root_node());
                    candidates.extend(pass.blocks.into_iter().map(Candidate::Structural));
                    references = pass.references;
                    inline_styles = pass.inline_styles;
                }
                None => warn!("{}: markup parse failed, pattern pass only", source_path),
            }
        }

        candidates.extend(
            pattern::pattern_pass(source_path, text, file_kind)
                .into_iter()
                .map(Candidate::Pattern),
        );

        Extraction {
            blocks: merge_candidates(candidates),
            references,
            inline_styles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn extract(text: &str) -> Extraction {
        BlockExtractor::new()
            .unwrap()
            .extract("Views/Home/Index.cshtml", text, FileKind::Markup)
    }

    fn block(kind: BlockKind, origin: Origin, start: usize, end: usize) -> CodeBlock {
        CodeBlock {
            source_path: "a.html".to_string(),
            start_line: start,
            end_line: end,
            kind,
            raw_text: format!("{:?}@{}", origin, start),
            origin,
            attribute: None,
            locus: Locus::default(),
        }
    }

    #[test]
    fn test_file_kind_detection() {
        assert_eq!(FileKind::from_extension("ASPX"), Some(FileKind::Markup));
        assert_eq!(FileKind::from_extension("js"), Some(FileKind::Script));
        assert_eq!(FileKind::from_extension("css"), Some(FileKind::Style));
        assert_eq!(FileKind::from_extension("png"), None);
    }

    #[test]
    fn test_comment_syntax() {
        assert_eq!(FileKind::Markup.comment("a -- b"), "<!-- a - - b -->");
        assert_eq!(FileKind::Script.comment("x\ny"), "// x y");
        assert_eq!(FileKind::Style.comment("*/"), "/* * / */");
    }

    #[test]
    fn test_kind_tags_round_trip() {
        for kind in BlockKind::ALL {
            assert_eq!(BlockKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(BlockKind::StyleBlock.extension(), "css");
        assert_eq!(BlockKind::EventHandlerAttribute.extension(), "js");
    }

    #[test]
    fn test_structural_beats_overlapping_pattern() {
        let merged = merge_candidates(vec![
            Candidate::Pattern(block(BlockKind::PseudoProtocolUri, Origin::PatternMatch, 4, 4)),
            Candidate::Structural(block(BlockKind::ScriptBlock, Origin::StructuralMatch, 2, 6)),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].kind, BlockKind::ScriptBlock);
    }

    #[test]
    fn test_off_by_one_overlap_is_duplicate() {
        // Assumed rule: any overlap between same-kind spans is a duplicate,
        // not only an identical start line.
        let merged = merge_candidates(vec![
            Candidate::Structural(block(BlockKind::PseudoProtocolUri, Origin::StructuralMatch, 7, 8)),
            Candidate::Pattern(block(BlockKind::PseudoProtocolUri, Origin::PatternMatch, 8, 8)),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].origin, Origin::StructuralMatch);
    }

    #[test]
    fn test_lone_pattern_kept() {
        let merged = merge_candidates(vec![
            Candidate::Structural(block(BlockKind::EventHandlerAttribute, Origin::StructuralMatch, 3, 3)),
            Candidate::Pattern(block(BlockKind::PseudoProtocolUri, Origin::PatternMatch, 3, 3)),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_same_key_blocks_coalesce() {
        let mut a = block(BlockKind::EventHandlerAttribute, Origin::StructuralMatch, 5, 5);
        a.attribute = Some("onmouseover".into());
        a.raw_text = "hi()".into();
        a.locus.anchor_line = 4;
        let mut b = block(BlockKind::EventHandlerAttribute, Origin::StructuralMatch, 5, 6);
        b.attribute = Some("onmouseout".into());
        b.raw_text = "bye()".into();

        let merged = merge_candidates(vec![Candidate::Structural(a), Candidate::Structural(b)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].raw_text, "hi()\nbye()");
        assert_eq!(merged[0].end_line, 6);
        assert_eq!(merged[0].attribute.as_deref(), Some("onmouseover,onmouseout"));
        assert_eq!(merged[0].locus.element, None);
        assert_eq!(merged[0].anchor_line(), 4);
    }

    #[test]
    fn test_script_comment_uri_appears_once() {
        let html = "<html>\n<body>\n<script>\n// see <a href=\"javascript:void(0)\">x</a>\nrun();\n</script>\n</body>\n</html>\n";
        let result = extract(html);
        assert_eq!(result.blocks.len(), 1);
        assert_eq!(result.blocks[0].kind, BlockKind::ScriptBlock);
        assert_eq!(result.blocks[0].start_line, 3);
        assert_eq!(result.blocks[0].end_line, 6);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let html = "<div onclick=\"go()\">\n<a href=\"javascript:x()\">x</a>\n<style>p{}</style>\n<script>\nif (a) { b(); }\n</script>\n<% if (x) { %><a href='javascript:y()'>y</a><% } %>\n";
        let first = extract(html);
        let second = extract(html);
        assert_eq!(first.blocks, second.blocks);
        assert!(first.blocks.len() >= 4);
        let mut lines: Vec<usize> = first.blocks.iter().map(|b| b.start_line).collect();
        let sorted = {
            let mut s = lines.clone();
            s.sort();
            s
        };
        assert_eq!(lines, sorted);
        lines.dedup();
        assert!(!lines.is_empty());
    }

    #[test]
    fn test_find_by_span() {
        let result = extract("<p>\n<script>a()</script>\n</p>\n");
        assert!(result.find(BlockKind::ScriptBlock, 2, 2).is_some());
        assert!(result.find(BlockKind::ScriptBlock, 2, 3).is_none());
        assert!(result.find(BlockKind::StyleBlock, 2, 2).is_none());
    }
}
