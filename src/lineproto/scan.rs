//! Measurement-key scanning

use crate::{Error, Result};

/// Upper bound on a measurement key. Overflow is a scan error, never a
/// silent truncation.
pub const MAX_KEY_LEN: usize = 128;

/// Extract the measurement key from a line-protocol row.
///
/// The key runs up to the first unescaped space or comma. A backslash
/// escapes the next byte verbatim, including space, comma and backslash.
/// A row that ends without a delimiter is a scan error.
pub fn scan_key(line: &[u8]) -> Result<String> {
    let mut key = Vec::with_capacity(32);
    let mut i = 0;
    while i < line.len() {
        match line[i] {
            b'\\' => {
                i += 1;
                if i >= line.len() {
                    return Err(Error::UnexpectedEndOfLine);
                }
                key.push(line[i]);
            }
            b' ' | b',' => {
                return String::from_utf8(key)
                    .map_err(|_| Error::InvalidPoint("measurement is not utf-8".to_string()));
            }
            c => key.push(c),
        }
        if key.len() > MAX_KEY_LEN {
            return Err(Error::KeyTooLong(MAX_KEY_LEN));
        }
        i += 1;
    }
    Err(Error::UnexpectedEndOfLine)
}

/// Escape a measurement name for embedding in a row
pub fn escape_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, ' ' | ',' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_plain_key() {
        assert_eq!(scan_key(b"cpu,host=a value=1").unwrap(), "cpu");
        assert_eq!(scan_key(b"cpu value=1").unwrap(), "cpu");
    }

    #[test]
    fn test_scan_escaped_delimiters() {
        assert_eq!(scan_key(br"cpu\ load,host=a value=1").unwrap(), "cpu load");
        assert_eq!(scan_key(br"a\,b value=1").unwrap(), "a,b");
        assert_eq!(scan_key(br"a\\b value=1").unwrap(), r"a\b");
    }

    #[test]
    fn test_scan_escape_roundtrip() {
        for name in ["cpu", "cpu load", "a,b", r"c\d", "disk io,used bytes"] {
            let line = format!("{},tag=v value=1", escape_key(name));
            assert_eq!(scan_key(line.as_bytes()).unwrap(), name, "name: {name:?}");
        }
    }

    #[test]
    fn test_scan_missing_delimiter() {
        assert!(matches!(
            scan_key(b"no_delimiter_here"),
            Err(Error::UnexpectedEndOfLine)
        ));
        assert!(matches!(scan_key(b""), Err(Error::UnexpectedEndOfLine)));
    }

    #[test]
    fn test_scan_trailing_backslash() {
        assert!(matches!(
            scan_key(br"cpu\"),
            Err(Error::UnexpectedEndOfLine)
        ));
    }

    #[test]
    fn test_scan_oversized_key() {
        let mut line = vec![b'x'; MAX_KEY_LEN + 1];
        line.extend_from_slice(b" value=1");
        assert!(matches!(scan_key(&line), Err(Error::KeyTooLong(_))));

        // exactly at the bound still scans
        let mut line = vec![b'x'; MAX_KEY_LEN];
        line.extend_from_slice(b" value=1");
        assert_eq!(scan_key(&line).unwrap().len(), MAX_KEY_LEN);
    }
}
