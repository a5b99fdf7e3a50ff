//! Shared helpers for the structural and pattern passes.

use tree_sitter::Node;

// ============ Event Handler Names ============

/// Attribute names treated as inline event handlers.
pub const EVENT_HANDLER_ATTRIBUTES: &[&str] = &[
    // Mouse
    "onclick", "ondblclick", "onmousedown", "onmouseup", "onmouseover", "onmousemove",
    "onmouseout", "onmouseenter", "onmouseleave", "oncontextmenu", "onwheel",
    // Keyboard
    "onkeydown", "onkeypress", "onkeyup",
    // Form
    "onsubmit", "onreset", "onchange", "oninput", "oninvalid", "onfocus", "onblur", "onselect",
    // Clipboard
    "oncopy", "oncut", "onpaste",
    // Window
    "onload", "onunload", "onbeforeunload", "onresize", "onscroll", "onhashchange",
    // Media and other
    "onerror", "onabort", "onplay", "onpause", "onended", "onvolumechange", "ontimeupdate",
    "ondrag", "ondragstart", "ondragend", "ondragover", "ondrop",
];

/// Attributes whose value is a URI and may carry a `javascript:` payload.
pub const URI_ATTRIBUTES: &[&str] = &["href", "src", "action", "formaction"];

pub fn is_event_handler(name: &str) -> bool {
    EVENT_HANDLER_ATTRIBUTES
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

pub fn is_uri_attribute(name: &str) -> bool {
    URI_ATTRIBUTES.iter().any(|a| a.eq_ignore_ascii_case(name))
}

pub fn is_pseudo_protocol(value: &str) -> bool {
    value
        .trim_start()
        .get(..11)
        .is_some_and(|p| p.eq_ignore_ascii_case("javascript:"))
}

pub fn is_remote_target(target: &str) -> bool {
    let lower = target.trim().to_ascii_lowercase();
    lower.starts_with("http:") || lower.starts_with("https:") || lower.starts_with("//")
}

// ============ Node Positions ============

/// Verbatim text of a node, untrimmed. Extracted content must match the
/// source byte for byte.
pub fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

/// 1-based first line of a node.
pub fn node_start_line(node: Node) -> usize {
    node.start_position().row + 1
}

/// 1-based last line of a node. A node ending exactly at a line break ends
/// on the previous line.
pub fn node_end_line(node: Node) -> usize {
    let start = node.start_position();
    let end = node.end_position();
    if end.column == 0 && end.row > start.row {
        end.row
    } else {
        end.row + 1
    }
}

// ============ Line Index ============

/// Byte offset of every line start, for offset <-> line lookups.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            text.bytes()
                .enumerate()
                .filter(|&(_, b)| b == b'\n')
                .map(|(i, _)| i + 1),
        );
        if starts.len() > 1 && starts.last() == Some(&text.len()) {
            starts.pop();
        }
        Self {
            starts,
            len: text.len(),
        }
    }

    /// 1-based line containing `offset`.
    pub fn line_of(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        }
    }

    /// Byte offset where 1-based `line` starts.
    pub fn line_start(&self, line: usize) -> Option<usize> {
        self.starts.get(line.checked_sub(1)?).copied()
    }

    /// Byte offset just past 1-based `line`, line break included.
    pub fn line_end(&self, line: usize) -> Option<usize> {
        if line == 0 || line > self.starts.len() {
            return None;
        }
        Some(self.starts.get(line).copied().unwrap_or(self.len))
    }

    pub fn line_count(&self) -> usize {
        if self.len == 0 {
            0
        } else {
            self.starts.len()
        }
    }
}

/// Leading whitespace of a line.
pub fn indentation(line: &str) -> &str {
    let trimmed = line.trim_start_matches([' ', '\t']);
    &line[..line.len() - trimmed.len()]
}

/// First `max_chars` characters of `text` on one line.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_names_case_insensitive() {
        assert!(is_event_handler("onClick"));
        assert!(is_event_handler("ONLOAD"));
        assert!(!is_event_handler("onboarding"));
        assert!(EVENT_HANDLER_ATTRIBUTES.len() >= 40);
    }

    #[test]
    fn test_pseudo_protocol() {
        assert!(is_pseudo_protocol("  JavaScript:void(0)"));
        assert!(!is_pseudo_protocol("/javascript/app.js"));
        assert!(!is_pseudo_protocol("java"));
    }

    #[test]
    fn test_line_index() {
        let text = "a\nbc\n\nd";
        let index = LineIndex::new(text);
        assert_eq!(index.line_count(), 4);
        assert_eq!(index.line_of(0), 1);
        assert_eq!(index.line_of(2), 2);
        assert_eq!(index.line_of(5), 3);
        assert_eq!(index.line_of(6), 4);
        assert_eq!(index.line_start(2), Some(2));
        assert_eq!(index.line_end(2), Some(5));
        assert_eq!(index.line_end(4), Some(7));
        assert_eq!(index.line_end(5), None);
    }

    #[test]
    fn test_line_index_trailing_newline() {
        let index = LineIndex::new("a\nb\n");
        assert_eq!(index.line_count(), 2);
        assert_eq!(index.line_end(2), Some(4));
    }

    #[test]
    fn test_preview_flattens() {
        assert_eq!(preview("a\n   b", 10), "a b");
        assert_eq!(preview("abcdef", 3), "abc...");
    }
}
