//! Backend databases
//!
//! A backend is one remote time-series database: a reqwest client bound to
//! its base URL, an `active` flag maintained by a periodic health probe,
//! and (when buffering is enabled) a bounded retry buffer that shields it
//! from bursts and outages.

pub mod http;
pub mod retry;

pub use http::{BackendClient, HttpBackend, ResponseData};
pub use retry::RetryBuffer;
