//! Source reader: loads a file's bytes, resolves legacy encodings and keeps
//! enough information to write the text back in the same encoding.

use std::borrow::Cow;
use std::fs;
use std::path::Path;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};

use crate::error::{Result, ScanError};

/// Decoded file text plus the encoding it was stored in.
#[derive(Debug, Clone)]
pub struct SourceText {
    pub text: String,
    pub encoding: &'static Encoding,
    /// Whether the file started with a byte order mark.
    pub bom: bool,
}

impl SourceText {
    pub fn encoding_name(&self) -> &'static str {
        self.encoding.name()
    }

    /// Encode `text` the way this source was stored, byte order mark included.
    pub fn encode(&self, text: &str) -> std::result::Result<Vec<u8>, String> {
        let mut out = Vec::with_capacity(text.len() + 3);
        if self.encoding == UTF_16LE || self.encoding == UTF_16BE {
            let little = self.encoding == UTF_16LE;
            if self.bom {
                out.extend_from_slice(if little { &[0xFF, 0xFE] } else { &[0xFE, 0xFF] });
            }
            for unit in text.encode_utf16() {
                let bytes = if little { unit.to_le_bytes() } else { unit.to_be_bytes() };
                out.extend_from_slice(&bytes);
            }
            return Ok(out);
        }

        if self.bom && self.encoding == UTF_8 {
            out.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
        }
        let (bytes, _, unmappable) = self.encoding.encode(text);
        if unmappable {
            return Err(format!("text is not representable in {}", self.encoding.name()));
        }
        out.extend_from_slice(&bytes);
        Ok(out)
    }
}

/// Read and decode a file, refusing files above `max_bytes`.
pub fn read_source(path: &Path, max_bytes: u64) -> Result<SourceText> {
    let meta = fs::metadata(path).map_err(|e| ScanError::read(path, e))?;
    if meta.len() > max_bytes {
        return Err(ScanError::TooLarge {
            path: path.to_path_buf(),
            size: meta.len(),
            max: max_bytes,
        });
    }
    let bytes = fs::read(path).map_err(|e| ScanError::read(path, e))?;
    decode_bytes(&bytes).map_err(|reason| ScanError::read(path, reason))
}

/// Write `text` to `path` in the encoding described by `source`.
pub fn write_source(path: &Path, source: &SourceText, text: &str) -> std::io::Result<()> {
    let bytes = source.encode(text).map_err(std::io::Error::other)?;
    fs::write(path, bytes)
}

/// Decode raw bytes: byte order mark, then strict UTF-8, then a detector
/// guess, then windows-1252 as the last resort.
pub fn decode_bytes(bytes: &[u8]) -> std::result::Result<SourceText, String> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let body = &bytes[bom_len..];
        let text = encoding
            .decode_without_bom_handling_and_without_replacement(body)
            .ok_or_else(|| format!("invalid {} after byte order mark", encoding.name()))?;
        return Ok(SourceText {
            text: text.into_owned(),
            encoding,
            bom: true,
        });
    }

    if looks_binary(bytes) {
        return Err("binary content".to_string());
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok(SourceText {
            text: text.to_string(),
            encoding: UTF_8,
            bom: false,
        });
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let guess = detector.guess(None, false);

    for encoding in [guess, WINDOWS_1252] {
        if let Some(text) = strict_decode(encoding, bytes) {
            return Ok(SourceText {
                text: text.into_owned(),
                encoding,
                bom: false,
            });
        }
    }

    Err("failed to decode with detected or fallback encodings".to_string())
}

fn strict_decode<'a>(encoding: &'static Encoding, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
    encoding.decode_without_bom_handling_and_without_replacement(bytes)
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_utf8() {
        let source = decode_bytes("<p>caf\u{e9}</p>".as_bytes()).unwrap();
        assert_eq!(source.encoding_name(), "UTF-8");
        assert!(!source.bom);
        assert_eq!(source.text, "<p>caf\u{e9}</p>");
    }

    #[test]
    fn test_legacy_single_byte_round_trip() {
        // "café" in windows-1252
        let bytes = b"<p>caf\xe9 \x93quoted\x94</p>\r\n";
        let source = decode_bytes(bytes).unwrap();
        assert_ne!(source.encoding_name(), "UTF-8");
        assert!(source.text.starts_with("<p>caf"));
        assert_eq!(source.encode(&source.text).unwrap(), bytes.to_vec());
    }

    #[test]
    fn test_utf8_bom_preserved() {
        let bytes = b"\xEF\xBB\xBF<script>x()</script>";
        let source = decode_bytes(bytes).unwrap();
        assert!(source.bom);
        assert_eq!(source.text, "<script>x()</script>");
        assert_eq!(source.encode(&source.text).unwrap(), bytes.to_vec());
    }

    #[test]
    fn test_utf16le_round_trip() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "<b>hi</b>".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let source = decode_bytes(&bytes).unwrap();
        assert_eq!(source.text, "<b>hi</b>");
        assert_eq!(source.encode(&source.text).unwrap(), bytes);
    }

    #[test]
    fn test_binary_rejected() {
        assert!(decode_bytes(b"\x89PNG\x00\x00\x00").is_err());
    }

    #[test]
    fn test_size_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.html");
        fs::write(&path, "x".repeat(64)).unwrap();
        assert!(matches!(read_source(&path, 16), Err(ScanError::TooLarge { size: 64, .. })));
        assert!(read_source(&path, 64).is_ok());
    }
}
