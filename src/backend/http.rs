//! HTTP backend: one remote time-series database

use crate::backend::retry::RetryBuffer;
use crate::config::BackendConfig;
use crate::Result;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Response captured from a backend write
#[derive(Debug)]
pub struct ResponseData {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub body: bytes::Bytes,
}

impl ResponseData {
    /// True when the backend accepted the write
    pub fn ok(&self) -> bool {
        self.status < 300
    }
}

/// Transport half of a backend: the HTTP client bound to its base URL.
/// Shared between the probe loop, the retry buffer and direct writes.
#[derive(Debug)]
pub struct BackendClient {
    name: String,
    location: String,
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(cfg: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .danger_accept_invalid_certs(cfg.skip_tls_verification)
            .build()?;
        Ok(Self {
            name: cfg.name.clone(),
            location: cfg.location.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// POST a line-protocol payload to `{location}/write?{query}`
    pub async fn write(
        &self,
        buf: &[u8],
        query: &str,
        auth: Option<&str>,
    ) -> Result<ResponseData> {
        let url = format!("{}/write?{}", self.location, query);
        let mut req = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "text/plain")
            .body(buf.to_vec());
        if let Some(auth) = auth {
            req = req.header(AUTHORIZATION, auth);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let content_type = header_string(&resp, CONTENT_TYPE);
        let content_encoding = header_string(&resp, CONTENT_ENCODING);
        let body = resp.bytes().await?;

        Ok(ResponseData {
            status,
            content_type,
            content_encoding,
            body,
        })
    }

    /// Forward a query to `{location}/query?{form}` with an empty body
    pub async fn query(
        &self,
        method: &str,
        form: &str,
        auth: Option<&str>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/query?{}", self.location, form);
        let method = if method.eq_ignore_ascii_case("POST") {
            reqwest::Method::POST
        } else {
            reqwest::Method::GET
        };

        let mut req = self.client.request(method, url).header(CONTENT_LENGTH, "0");
        if let Some(auth) = auth {
            req = req.header(AUTHORIZATION, auth);
        }
        Ok(req.send().await?)
    }

    /// Probe `{location}/ping`. Success is any completed HTTP exchange;
    /// a non-204 status is logged but only a transport failure is an error.
    pub async fn ping(&self) -> Result<Option<String>> {
        let resp = self
            .client
            .get(format!("{}/ping", self.location))
            .send()
            .await?;

        let version = resp
            .headers()
            .get("X-Influxdb-Version")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if resp.status() != StatusCode::NO_CONTENT {
            let status = resp.status();
            let body = resp.bytes().await.unwrap_or_default();
            warn!(
                backend = %self.name,
                %status,
                body = %String::from_utf8_lossy(&body),
                "unexpected ping status"
            );
        }

        Ok(version)
    }
}

fn header_string(resp: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// One backend of a shard: transport, health state and optional buffering
pub struct HttpBackend {
    client: Arc<BackendClient>,
    active: Arc<AtomicBool>,
    buffer: Option<Arc<RetryBuffer>>,
    probe: JoinHandle<()>,
}

impl HttpBackend {
    /// Build the backend and start its health probe. Backends start
    /// active; the first failed probe marks them down.
    pub fn new(cfg: &BackendConfig) -> Result<Self> {
        let client = Arc::new(BackendClient::new(cfg)?);
        let active = Arc::new(AtomicBool::new(true));

        // A buffer per backend serializes retries against it
        let buffer = if cfg.buffer_size_mb > 0 {
            Some(RetryBuffer::spawn(
                client.clone(),
                cfg.buffer_size(),
                cfg.batch_size(),
                cfg.max_delay(),
            ))
        } else {
            None
        };

        let probe = tokio::spawn(probe_loop(
            client.clone(),
            active.clone(),
            cfg.probe_interval(),
        ));

        Ok(Self {
            client,
            active,
            buffer,
            probe,
        })
    }

    pub fn name(&self) -> &str {
        self.client.name()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn client(&self) -> &Arc<BackendClient> {
        &self.client
    }

    pub fn retry_buffer(&self) -> Option<&Arc<RetryBuffer>> {
        self.buffer.as_ref()
    }

    /// Stop the probe, mark inactive and shut the retry buffer down.
    /// Jobs still buffered are lost; buffers are volatile by contract.
    pub fn close(&self) {
        self.probe.abort();
        self.active.store(false, Ordering::Relaxed);
        if let Some(buffer) = &self.buffer {
            buffer.close();
        }
        debug!(backend = %self.client.name(), "backend closed");
    }
}

async fn probe_loop(client: Arc<BackendClient>, active: Arc<AtomicBool>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // the first tick completes immediately; backends start active
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match client.ping().await {
            Ok(_) => {
                if !active.swap(true, Ordering::Relaxed) {
                    info!(backend = %client.name(), "backend recovered");
                }
            }
            Err(err) => {
                active.store(false, Ordering::Relaxed);
                warn!(backend = %client.name(), error = %err, "backend inactive");
            }
        }
    }
}
