//! Line-protocol handling
//!
//! Rows look like `measurement[,tag=val,...] field=val[,...] [timestamp]`,
//! newline separated. A backslash escapes the following byte, so measurement
//! names may contain spaces, commas and backslashes. This module extracts
//! the routing key from a row and normalises whole request bodies into
//! canonical precision form.

mod point;
mod scan;

pub use point::{normalize_lines, Precision};
pub(crate) use point::trim_space;
pub use scan::{escape_key, scan_key, MAX_KEY_LEN};
