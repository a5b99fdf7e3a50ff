//! Line-by-line pattern pass over raw text.
//!
//! Catches `javascript:` URI attributes the structural parser cannot see,
//! such as markup interleaved with server template syntax.

use once_cell::sync::Lazy;
use regex::Regex;

use super::common::LineIndex;
use super::{BlockKind, CodeBlock, FileKind, Locus, Origin};

static PSEUDO_PROTOCOL_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\b(href|src|action|formaction)\s*=\s*(?:"(\s*javascript:[^"]*)"|'(\s*javascript:[^']*)'|(javascript:[^\s>]*))"#,
    )
    .unwrap()
});

pub fn pattern_pass(source_path: &str, text: &str, file_kind: FileKind) -> Vec<CodeBlock> {
    let index = LineIndex::new(text);
    let mut blocks = Vec::new();
    let mut offset = 0;

    for (line_no, line) in text.split_inclusive('\n').enumerate() {
        let line_no = line_no + 1;
        for caps in PSEUDO_PROTOCOL_ATTR.captures_iter(line) {
            let Some(value) = caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4)) else {
                continue;
            };
            let attr_start = caps.get(0).map(|m| m.start()).unwrap_or(0) + offset;
            let anchor_line = match file_kind {
                FileKind::Markup => text[..attr_start]
                    .rfind('<')
                    .map(|lt| index.line_of(lt))
                    .unwrap_or(line_no),
                _ => line_no,
            };

            blocks.push(CodeBlock {
                source_path: source_path.to_string(),
                start_line: line_no,
                end_line: line_no,
                kind: BlockKind::PseudoProtocolUri,
                raw_text: value.as_str().to_string(),
                origin: Origin::PatternMatch,
                attribute: caps.get(1).map(|m| m.as_str().to_ascii_lowercase()),
                locus: Locus {
                    element: None,
                    anchor_line,
                },
            });
        }
        offset += line.len();
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_uri_in_templated_markup() {
        let text = "@if (Model.CanEdit) {\n  <a class=\"edit\" href=\"javascript:edit(@Model.Id)\">Edit</a>\n}\n";
        let blocks = pattern_pass("Views/Edit.cshtml", text, FileKind::Markup);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start_line, 2);
        assert_eq!(blocks[0].raw_text, "javascript:edit(@Model.Id)");
        assert_eq!(blocks[0].origin, Origin::PatternMatch);
        assert_eq!(blocks[0].attribute.as_deref(), Some("href"));
    }

    #[test]
    fn test_quote_styles() {
        let text = "<a href='javascript:a()'>a</a><form action=javascript:b()>\n<a HREF = \"JavaScript:c()\">";
        let blocks = pattern_pass("a.html", text, FileKind::Markup);
        let values: Vec<&str> = blocks.iter().map(|b| b.raw_text.as_str()).collect();
        assert_eq!(values, vec!["javascript:a()", "javascript:b()", "JavaScript:c()"]);
        assert_eq!(blocks[2].start_line, 2);
    }

    #[test]
    fn test_anchor_is_owning_tag_line() {
        let text = "<a class=\"x\"\n   href=\"javascript:go()\">go</a>\n";
        let blocks = pattern_pass("a.html", text, FileKind::Markup);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start_line, 2);
        assert_eq!(blocks[0].anchor_line(), 1);
    }

    #[test]
    fn test_plain_links_ignored() {
        let text = "<a href=\"/javascript/intro.html\">intro</a>\n<script src=\"app.js\"></script>";
        assert!(pattern_pass("a.html", text, FileKind::Markup).is_empty());
    }
}
