//! Point normalisation
//!
//! `/write` bodies are re-encoded before fan-out: every row is checked for
//! a measurement section, a field set and an optional integer timestamp,
//! and rows without a timestamp are stamped with the server receive time
//! in the request's precision units.

use crate::{Error, Result};

/// Timestamp precision of a write request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
}

impl Precision {
    /// Parse the `precision` query parameter. Empty means nanoseconds.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "" | "n" | "ns" => Ok(Precision::Nanoseconds),
            "u" => Ok(Precision::Microseconds),
            "ms" => Ok(Precision::Milliseconds),
            "s" => Ok(Precision::Seconds),
            "m" => Ok(Precision::Minutes),
            "h" => Ok(Precision::Hours),
            other => Err(Error::InvalidPrecision(other.to_string())),
        }
    }

    /// Convert a unix-nanosecond instant into this precision's units
    pub fn from_unix_nanos(self, nanos: i64) -> i64 {
        match self {
            Precision::Nanoseconds => nanos,
            Precision::Microseconds => nanos / 1_000,
            Precision::Milliseconds => nanos / 1_000_000,
            Precision::Seconds => nanos / 1_000_000_000,
            Precision::Minutes => nanos / 60_000_000_000,
            Precision::Hours => nanos / 3_600_000_000_000,
        }
    }
}

/// Normalise a whole `/write` body into `out`, one canonical row per line.
///
/// Returns the number of rows written. Any malformed row fails the whole
/// body; the caller maps that to a 400.
pub fn normalize_lines(
    body: &[u8],
    precision: Precision,
    now_nanos: i64,
    out: &mut Vec<u8>,
) -> Result<usize> {
    let mut rows = 0;
    for raw in body.split(|b| *b == b'\n') {
        let line = trim_space(raw);
        if line.is_empty() {
            continue;
        }

        let (key, fields, timestamp) = split_sections(line)?;
        out.extend_from_slice(key);
        out.push(b' ');
        out.extend_from_slice(fields);
        out.push(b' ');
        let ts = match timestamp {
            Some(ts) => ts,
            None => precision.from_unix_nanos(now_nanos),
        };
        out.extend_from_slice(ts.to_string().as_bytes());
        out.push(b'\n');
        rows += 1;
    }
    Ok(rows)
}

/// Strip leading/trailing spaces, tabs and carriage returns
pub(crate) fn trim_space(mut line: &[u8]) -> &[u8] {
    while let Some((first, rest)) = line.split_first() {
        if matches!(first, b' ' | b'\t' | b'\r') {
            line = rest;
        } else {
            break;
        }
    }
    while let Some((last, rest)) = line.split_last() {
        if matches!(last, b' ' | b'\t' | b'\r') {
            line = rest;
        } else {
            break;
        }
    }
    line
}

/// Split a row into measurement+tag section, field section and timestamp
fn split_sections(line: &[u8]) -> Result<(&[u8], &[u8], Option<i64>)> {
    let key_end = section_end(line, 0, false)?;
    let key = &line[..key_end];
    if key.is_empty() {
        return Err(Error::InvalidPoint("missing measurement".to_string()));
    }

    let mut fields_start = key_end;
    while fields_start < line.len() && line[fields_start] == b' ' {
        fields_start += 1;
    }
    if fields_start == line.len() {
        return Err(Error::InvalidPoint("missing fields".to_string()));
    }

    let fields_end = section_end(line, fields_start, true)?;
    let fields = &line[fields_start..fields_end];
    if !has_unquoted_eq(fields) {
        return Err(Error::InvalidPoint("missing field value".to_string()));
    }

    let rest = trim_space(&line[fields_end..]);
    let timestamp = if rest.is_empty() {
        None
    } else {
        let text = std::str::from_utf8(rest)
            .map_err(|_| Error::InvalidPoint("timestamp is not utf-8".to_string()))?;
        let ts: i64 = text
            .parse()
            .map_err(|_| Error::InvalidPoint(format!("invalid timestamp '{}'", text)))?;
        Some(ts)
    };

    Ok((key, fields, timestamp))
}

/// Index of the first unescaped space at or after `start`. With `quoted`,
/// spaces inside double-quoted field strings do not terminate the section.
fn section_end(line: &[u8], start: usize, quoted: bool) -> Result<usize> {
    let mut in_quotes = false;
    let mut i = start;
    while i < line.len() {
        match line[i] {
            b'\\' => {
                // escape consumes the next byte
                i += 1;
            }
            b'"' if quoted => in_quotes = !in_quotes,
            b' ' if !in_quotes => return Ok(i),
            _ => {}
        }
        i += 1;
    }
    if in_quotes {
        return Err(Error::InvalidPoint("unbalanced quotes".to_string()));
    }
    if quoted {
        // field section may run to end of line
        Ok(line.len())
    } else {
        Err(Error::InvalidPoint("missing fields".to_string()))
    }
}

fn has_unquoted_eq(fields: &[u8]) -> bool {
    let mut in_quotes = false;
    let mut i = 0;
    while i < fields.len() {
        match fields[i] {
            b'\\' => i += 1,
            b'"' => in_quotes = !in_quotes,
            b'=' if !in_quotes => return true,
            _ => {}
        }
        i += 1;
    }
    false
}
