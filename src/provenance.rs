//! Provenance codec: a reversible, filename-safe id per block.
//!
//! ```text
//! {escaped source path}~{kind tag}~L{start}-L{end}
//! Views/Home/Index.cshtml, ScriptBlock, 10..12
//!   -> Views%2FHome%2FIndex.cshtml~script~L10-L12
//! ```
//!
//! The path is percent-escaped, including `%` itself and the `~` delimiter,
//! so decoding never has to guess. Only canonical ids decode: anything
//! `encode` would not have produced is rejected.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};
use crate::extract::{BlockKind, CodeBlock};

const DELIMITER: char = '~';

/// Bytes escaped in the path part: the delimiter, the escape byte, path
/// separators and everything a common filesystem reserves.
const PATH_ESCAPES: &AsciiSet = &CONTROLS
    .add(b'%')
    .add(b'~')
    .add(b'/')
    .add(b'\\')
    .add(b' ')
    .add(b'<')
    .add(b'>')
    .add(b':')
    .add(b'"')
    .add(b'|')
    .add(b'?')
    .add(b'*')
    .add(b'#');

/// Bytes escaped when an id is placed in a URL path segment.
const URL_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// The four fields that identify a block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockKey {
    /// `/`-separated, relative to the scanned root.
    pub source_path: String,
    pub kind: BlockKind,
    pub start_line: usize,
    pub end_line: usize,
}

impl BlockKey {
    pub fn of(block: &CodeBlock) -> Self {
        Self {
            source_path: block.source_path.clone(),
            kind: block.kind,
            start_line: block.start_line,
            end_line: block.end_line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvenanceId(String);

impl ProvenanceId {
    pub fn encode(key: &BlockKey) -> Self {
        let path = normalize_path(&key.source_path);
        Self(format!(
            "{}{d}{}{d}L{}-L{}",
            utf8_percent_encode(&path, PATH_ESCAPES),
            key.kind.tag(),
            key.start_line,
            key.end_line,
            d = DELIMITER,
        ))
    }

    pub fn for_block(block: &CodeBlock) -> Self {
        Self::encode(&BlockKey::of(block))
    }

    /// Wrap a raw string without validating it; call [`Self::decode`] next.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact inverse of [`Self::encode`].
    pub fn decode(&self) -> Result<BlockKey> {
        let id = self.0.as_str();
        let mut parts = id.rsplitn(3, DELIMITER);
        let (Some(range), Some(tag), Some(escaped)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ScanError::malformed(id, "expected path~kind~range"));
        };

        let kind = BlockKind::from_tag(tag)
            .ok_or_else(|| ScanError::malformed(id, format!("unknown kind tag {:?}", tag)))?;
        let (start_line, end_line) =
            parse_range(range).ok_or_else(|| ScanError::malformed(id, "bad line range"))?;
        if start_line == 0 || start_line > end_line {
            return Err(ScanError::malformed(id, "line range out of order"));
        }

        let source_path = percent_decode_str(escaped)
            .decode_utf8()
            .map_err(|e| ScanError::malformed(id, e.to_string()))?
            .into_owned();
        if source_path.is_empty() {
            return Err(ScanError::malformed(id, "empty source path"));
        }

        let key = BlockKey {
            source_path,
            kind,
            start_line,
            end_line,
        };
        if Self::encode(&key).0 != id {
            return Err(ScanError::malformed(id, "not in canonical form"));
        }
        Ok(key)
    }

    /// Name of the externally stored extracted file.
    pub fn file_name(&self, kind: BlockKind) -> String {
        format!("{}.{}", self.0, kind.extension())
    }

    /// The id escaped for use as one URL path segment.
    pub fn url_segment(&self) -> String {
        utf8_percent_encode(&self.0, URL_SEGMENT).to_string()
    }
}

impl fmt::Display for ProvenanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Relative paths are stored `/`-separated regardless of platform.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

fn parse_range(range: &str) -> Option<(usize, usize)> {
    let (start, end) = range.strip_prefix('L')?.split_once("-L")?;
    Some((parse_line(start)?, parse_line(end)?))
}

fn parse_line(digits: &str) -> Option<usize> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(path: &str, kind: BlockKind, start: usize, end: usize) -> BlockKey {
        BlockKey {
            source_path: path.to_string(),
            kind,
            start_line: start,
            end_line: end,
        }
    }

    #[test]
    fn test_encode_shape() {
        let id = ProvenanceId::encode(&key("Views/Home/Index.cshtml", BlockKind::ScriptBlock, 10, 12));
        assert_eq!(id.as_str(), "Views%2FHome%2FIndex.cshtml~script~L10-L12");
        assert_eq!(id.file_name(BlockKind::ScriptBlock), "Views%2FHome%2FIndex.cshtml~script~L10-L12.js");
    }

    #[test]
    fn test_round_trip_awkward_paths() {
        let paths = [
            "index.html",
            "a/b/c/d.aspx",
            "weird~name~script~L1-L2.html",
            "100%/done%2F.html",
            "my_folder/my_file.html",
            "my/folder_my/file.html",
            "spaces in/name (1).htm",
            "unicode/caf\u{e9}/\u{65e5}\u{672c}.php",
            "colon:and|pipe?.jsp",
        ];
        for path in paths {
            for kind in BlockKind::ALL {
                let original = key(path, kind, 3, 7);
                let id = ProvenanceId::encode(&original);
                assert_eq!(id.decode().unwrap(), original, "{}", id);
                assert!(!id.as_str().contains('/'));
                assert!(!id.as_str().contains('\\'));
            }
        }
    }

    #[test]
    fn test_no_collision_on_underscore_paths() {
        let a = ProvenanceId::encode(&key("a_b/c.html", BlockKind::ScriptBlock, 1, 1));
        let b = ProvenanceId::encode(&key("a/b_c.html", BlockKind::ScriptBlock, 1, 1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_each_field_changes_id() {
        let base = key("a.html", BlockKind::ScriptBlock, 2, 4);
        let variants = [
            key("b.html", BlockKind::ScriptBlock, 2, 4),
            key("a.html", BlockKind::StyleBlock, 2, 4),
            key("a.html", BlockKind::ScriptBlock, 3, 4),
            key("a.html", BlockKind::ScriptBlock, 2, 5),
        ];
        let base_id = ProvenanceId::encode(&base);
        for variant in variants {
            assert_ne!(ProvenanceId::encode(&variant), base_id);
        }
    }

    #[test]
    fn test_backslashes_normalized() {
        let id = ProvenanceId::encode(&key("Views\\Shared\\_Layout.cshtml", BlockKind::StyleBlock, 1, 2));
        assert_eq!(id.decode().unwrap().source_path, "Views/Shared/_Layout.cshtml");
    }

    #[test]
    fn test_malformed_ids_rejected() {
        let bad = [
            "",
            "no-delimiters",
            "a.html~script",
            "a.html~macro~L1-L2",
            "a.html~script~L2-L1",
            "a.html~script~L0-L1",
            "a.html~script~L1-L",
            "a.html~script~L01-L2",
            "a.html~script~1-2",
            "a~b.html~script~L1-L2",
            "a%2fb.html~script~L1-L2",
            "a%ZZ.html~script~L1-L2",
            "a%FF.html~script~L1-L2",
            "~script~L1-L2",
        ];
        for raw in bad {
            let err = ProvenanceId::from_raw(raw).decode().unwrap_err();
            assert!(matches!(err, ScanError::MalformedProvenance { .. }), "{}", raw);
        }
    }

    #[test]
    fn test_url_segment_escapes_percent() {
        let id = ProvenanceId::encode(&key("a/b.html", BlockKind::ScriptBlock, 1, 1));
        assert_eq!(id.url_segment(), "a%252Fb.html~script~L1-L1");
    }
}
