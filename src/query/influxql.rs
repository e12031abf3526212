//! Minimal InfluxQL measurement locator
//!
//! The relay only needs the measurement behind the first `FROM` clause to
//! pick a shard; full statement parsing stays with the backends. Supports
//! bare, double-quoted and backtick-quoted identifiers and the
//! `db.rp.measurement` qualification forms.

use crate::{Error, Result};

/// Extract the measurement name a query reads from
pub fn measurement_from_query(q: &str) -> Result<String> {
    let bytes = q.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        i = skip_whitespace(bytes, i);
        if i >= bytes.len() {
            break;
        }

        let (token, next) = read_token(bytes, i)?;
        if token.eq_ignore_ascii_case("from") {
            return read_measurement(bytes, next, q);
        }
        i = next;
    }

    Err(Error::NoMeasurement(q.to_string()))
}

/// Parse the identifier chain after FROM, returning its last segment
fn read_measurement(bytes: &[u8], mut i: usize, q: &str) -> Result<String> {
    let mut segment = None;
    loop {
        i = skip_whitespace(bytes, i);
        if i >= bytes.len() {
            break;
        }

        let (ident, next) = read_identifier(bytes, i, q)?;
        segment = Some(ident);
        i = next;

        // a dot qualifies the segment just read (db or rp); keep going
        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
            continue;
        }
        break;
    }

    segment
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::NoMeasurement(q.to_string()))
}

fn read_identifier(bytes: &[u8], start: usize, q: &str) -> Result<(String, usize)> {
    match bytes[start] {
        quote @ (b'"' | b'`') => {
            let mut ident = Vec::new();
            let mut i = start + 1;
            while i < bytes.len() {
                match bytes[i] {
                    b'\\' if i + 1 < bytes.len() => {
                        ident.push(bytes[i + 1]);
                        i += 2;
                    }
                    c if c == quote => {
                        let ident = String::from_utf8(ident)
                            .map_err(|_| Error::NoMeasurement(q.to_string()))?;
                        return Ok((ident, i + 1));
                    }
                    c => {
                        ident.push(c);
                        i += 1;
                    }
                }
            }
            Err(Error::NoMeasurement(q.to_string()))
        }
        _ => {
            let mut i = start;
            while i < bytes.len()
                && !matches!(bytes[i], b' ' | b'\t' | b'\r' | b'\n' | b',' | b';' | b'(' | b')' | b'.')
            {
                i += 1;
            }
            let ident = std::str::from_utf8(&bytes[start..i])
                .map_err(|_| Error::NoMeasurement(q.to_string()))?;
            Ok((ident.to_string(), i))
        }
    }
}

/// Read a whitespace-delimited token for keyword matching
fn read_token(bytes: &[u8], start: usize) -> Result<(&str, usize)> {
    let mut i = start;
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    let token = std::str::from_utf8(&bytes[start..i])
        .map_err(|_| Error::NoMeasurement(String::new()))?;
    Ok((token, i))
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}
