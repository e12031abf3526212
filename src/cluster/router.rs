//! Cluster router: write fan-out and the dual-ring query path

use crate::backend::HttpBackend;
use crate::cluster::ring::HashRing;
use crate::cluster::stats::{RelayStats, STATS_INTERVAL};
use crate::config::HttpConfig;
use crate::lineproto::{scan_key, trim_space};
use crate::query::influxql::measurement_from_query;
use crate::query::merge::merge;
use crate::{Error, Result};
use futures::future::join_all;
use parking_lot::RwLock;
use regex::Regex;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Queries rejected outright: accidental full scans and DDL through the
/// relay, plus the literal `()$` artifact
pub const FORBIDDEN_QUERIES: &str =
    r"(?i:select\s+\*|^\s*delete|^\s*drop|^\s*grant|^\s*revoke|\(\)\$)";

/// At least one obligated pattern must match for a query to pass
pub const OBLIGATED_QUERIES: &str = r"(?i:where.*time|show.*from)";

/// Merged query response handed back to the front-end
#[derive(Debug)]
pub struct QueryResponse {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub body: Vec<u8>,
}

/// Routes writes and queries across the shard rings.
///
/// Owns every backend; rings hold only shard names. During a resharding
/// window the former ring and its backends are consulted read-only.
pub struct ClusterRouter {
    ring: HashRing,
    nodes: HashMap<String, Vec<Arc<HttpBackend>>>,
    former_ring: Option<HashRing>,
    former_nodes: HashMap<String, Vec<Arc<HttpBackend>>>,
    forbidden: RwLock<Vec<Regex>>,
    obligated: RwLock<Vec<Regex>>,
    stats: Arc<RelayStats>,
    default_tags: HashMap<String, String>,
    ticker: tokio::task::JoinHandle<()>,
}

impl ClusterRouter {
    /// Build rings and backends from one listener's configuration and
    /// start the statistics rotation. Backend construction errors abort
    /// startup.
    pub fn new(cfg: &HttpConfig) -> Result<Self> {
        let ring = HashRing::new(cfg.replicas);
        let mut nodes = HashMap::new();
        for (shard, backend_cfgs) in &cfg.output {
            ring.add(shard);
            nodes.insert(shard.clone(), build_backends(backend_cfgs)?);
        }

        let (former_ring, former_nodes) = match &cfg.former {
            Some(former) => {
                let ring = HashRing::new(cfg.replicas);
                let mut nodes = HashMap::new();
                for (shard, backend_cfgs) in former {
                    ring.add(shard);
                    nodes.insert(shard.clone(), build_backends(backend_cfgs)?);
                }
                (Some(ring), nodes)
            }
            None => (None, HashMap::new()),
        };

        let forbidden = vec![compile_policy(FORBIDDEN_QUERIES)?];
        let obligated = vec![compile_policy(OBLIGATED_QUERIES)?];

        let stats = Arc::new(RelayStats::new());
        let ticker = tokio::spawn({
            let stats = stats.clone();
            async move {
                let mut ticker = tokio::time::interval(STATS_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    stats.rotate();
                }
            }
        });

        let mut default_tags = HashMap::new();
        if !cfg.name.is_empty() {
            default_tags.insert("relay".to_string(), cfg.name.clone());
        }

        info!(
            shards = nodes.len(),
            former_shards = former_nodes.len(),
            replicas = cfg.replicas,
            "cluster router ready"
        );

        Ok(Self {
            ring,
            nodes,
            former_ring,
            former_nodes,
            forbidden: RwLock::new(forbidden),
            obligated: RwLock::new(obligated),
            stats,
            default_tags,
            ticker,
        })
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    pub fn default_tags(&self) -> &HashMap<String, String> {
        &self.default_tags
    }

    /// Add a pattern to the forbidden list
    pub fn forbid_query(&self, pattern: &str) -> Result<()> {
        let re = compile_policy(pattern)?;
        self.forbidden.write().push(re);
        Ok(())
    }

    /// Add a pattern to the obligated list
    pub fn ensure_query(&self, pattern: &str) -> Result<()> {
        let re = compile_policy(pattern)?;
        self.obligated.write().push(re);
        Ok(())
    }

    /// Apply the forbidden/obligated policy to a query string
    pub fn check_query(&self, q: &str) -> Result<()> {
        for re in self.forbidden.read().iter() {
            if re.is_match(q) {
                return Err(Error::QueryForbidden);
            }
        }

        let obligated = self.obligated.read();
        if !obligated.is_empty() && !obligated.iter().any(|re| re.is_match(q)) {
            return Err(Error::QueryForbidden);
        }

        Ok(())
    }

    /// Fan a normalised write body out to the shard backends.
    ///
    /// Rows are dispatched one at a time: each row goes to every active
    /// backend of its shard in parallel and all dispatches are awaited
    /// before the next row. Failures are absorbed and counted; the caller
    /// always gets 204.
    pub async fn write(&self, body: &[u8], query: &str, auth: Option<&str>) {
        self.stats
            .live()
            .write_requests
            .fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        for raw in body.split(|b| *b == b'\n') {
            let line = trim_space(raw);
            if line.is_empty() {
                continue;
            }
            self.write_row(line, query, auth).await;
        }

        self.stats
            .live()
            .write_request_duration
            .fetch_add(start.elapsed().as_nanos() as i64, Ordering::Relaxed);
    }

    /// A bad row must not stop the others, so errors are logged and
    /// counted instead of returned.
    async fn write_row(&self, line: &[u8], query: &str, auth: Option<&str>) {
        let stats = self.stats.live();
        stats.points_written.fetch_add(1, Ordering::Relaxed);

        let key = match scan_key(line) {
            Ok(key) => key,
            Err(err) => {
                warn!(error = %err, "discarding unroutable row");
                stats.points_written_fail.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let Some(shard) = self.ring.get(&key) else {
            warn!(measurement = %key, "no shard for measurement");
            stats.points_written_fail.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let Some(backends) = self.nodes.get(&shard) else {
            warn!(%shard, "shard has no backends");
            stats.points_written_fail.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let dispatches = backends
            .iter()
            .filter(|b| b.is_active())
            .map(|backend| dispatch_row(backend, line, query, auth));
        let results = join_all(dispatches).await;

        for result in results {
            if let Err(err) = result {
                warn!(measurement = %key, error = %err, "cluster write failed");
                stats.points_written_fail.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Resolve, fetch and merge a query across the current and former
    /// rings. All errors map to a 400 at the front-end.
    pub async fn query(
        &self,
        method: &str,
        form: &str,
        q: &str,
        auth: Option<&str>,
    ) -> Result<QueryResponse> {
        let stats = self.stats.live();
        stats.query_requests.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        let result = self.query_inner(method, form, q, auth).await;

        if result.is_err() {
            self.stats
                .live()
                .query_requests_fail
                .fetch_add(1, Ordering::Relaxed);
        }
        self.stats
            .live()
            .query_request_duration
            .fetch_add(start.elapsed().as_nanos() as i64, Ordering::Relaxed);

        result
    }

    async fn query_inner(
        &self,
        method: &str,
        form: &str,
        q: &str,
        auth: Option<&str>,
    ) -> Result<QueryResponse> {
        self.check_query(q)?;
        let key = measurement_from_query(q)?;

        let current = self
            .fetch_from_ring(&self.ring, &self.nodes, &key, method, form, auth)
            .await;

        // during a resharding window the former layout holds older data
        let former = match &self.former_ring {
            Some(ring) => {
                self.fetch_from_ring(ring, &self.former_nodes, &key, method, form, auth)
                    .await
            }
            None => FetchedResponse::default(),
        };

        let body = merge(&current.body, &former.body)?;

        Ok(QueryResponse {
            content_type: current.content_type.or(former.content_type),
            content_encoding: current.content_encoding.or(former.content_encoding),
            body,
        })
    }

    /// First active backend of the key's shard that answers without a
    /// transport error wins; its peers hold the same data.
    async fn fetch_from_ring(
        &self,
        ring: &HashRing,
        nodes: &HashMap<String, Vec<Arc<HttpBackend>>>,
        key: &str,
        method: &str,
        form: &str,
        auth: Option<&str>,
    ) -> FetchedResponse {
        let Some(shard) = ring.get(key) else {
            return FetchedResponse::default();
        };
        let Some(backends) = nodes.get(&shard) else {
            return FetchedResponse::default();
        };

        for backend in backends {
            if !backend.is_active() {
                continue;
            }
            match backend.client().query(method, form, auth).await {
                Ok(resp) => {
                    let content_type = header_string(resp.headers(), CONTENT_TYPE);
                    let content_encoding = header_string(resp.headers(), CONTENT_ENCODING);
                    match resp.bytes().await {
                        Ok(body) => {
                            return FetchedResponse {
                                content_type,
                                content_encoding,
                                body: body.to_vec(),
                            };
                        }
                        Err(err) => {
                            warn!(backend = %backend.name(), error = %err, "query body read failed");
                        }
                    }
                }
                Err(err) => {
                    warn!(backend = %backend.name(), error = %err, "query failed, trying next backend");
                }
            }
        }

        FetchedResponse::default()
    }

    /// Stop the statistics ticker and close every backend
    pub fn close(&self) {
        self.ticker.abort();
        for backends in self.nodes.values().chain(self.former_nodes.values()) {
            for backend in backends {
                backend.close();
            }
        }
        info!("cluster router closed");
    }
}

#[derive(Debug, Default)]
struct FetchedResponse {
    content_type: Option<String>,
    content_encoding: Option<String>,
    body: Vec<u8>,
}

async fn dispatch_row(
    backend: &Arc<HttpBackend>,
    line: &[u8],
    query: &str,
    auth: Option<&str>,
) -> Result<()> {
    match backend.retry_buffer() {
        Some(buffer) => buffer.push(line, query, auth),
        None => {
            let mut body = Vec::with_capacity(line.len() + 1);
            body.extend_from_slice(line);
            body.push(b'\n');
            let resp = backend.client().write(&body, query, auth).await?;
            if !resp.ok() {
                return Err(Error::Internal(format!(
                    "backend {} rejected write with status {}",
                    backend.name(),
                    resp.status
                )));
            }
            Ok(())
        }
    }
}

fn build_backends(cfgs: &[crate::config::BackendConfig]) -> Result<Vec<Arc<HttpBackend>>> {
    cfgs.iter()
        .map(|cfg| HttpBackend::new(cfg).map(Arc::new))
        .collect()
}

fn compile_policy(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Config(format!("bad policy regex '{}': {}", pattern, e)))
}

fn header_string(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;

    fn test_router(outputs: &[(&str, &str)]) -> ClusterRouter {
        let mut output = HashMap::new();
        for (shard, location) in outputs {
            output.insert(
                shard.to_string(),
                vec![BackendConfig {
                    name: format!("{shard}-b1"),
                    location: location.to_string(),
                    ..Default::default()
                }],
            );
        }
        let cfg = HttpConfig {
            name: "test".to_string(),
            replicas: 200,
            bind_addr: "127.0.0.1:0".to_string(),
            ssl_combined_pem: None,
            default_retention_policy: None,
            output,
            former: None,
        };
        ClusterRouter::new(&cfg).unwrap()
    }

    #[tokio::test]
    async fn test_default_policy() {
        let router = test_router(&[("s1", "http://127.0.0.1:1")]);

        // forbidden patterns
        for q in [
            "select * from cpu",
            "SELECT  * FROM cpu",
            "delete from cpu where time > now() - 1h",
            " DROP MEASUREMENT cpu",
            "grant all to nobody",
            "revoke all from nobody",
        ] {
            assert!(
                matches!(router.check_query(q), Err(Error::QueryForbidden)),
                "expected {q:?} to be forbidden"
            );
        }

        // obligated patterns admit these
        for q in [
            "select usage from cpu where time > now() - 1h",
            "SHOW measurements FROM cpu",
        ] {
            assert!(router.check_query(q).is_ok(), "expected {q:?} to pass");
        }

        // nothing obligated matches
        assert!(matches!(
            router.check_query("select usage from cpu"),
            Err(Error::QueryForbidden)
        ));

        router.close();
    }

    #[tokio::test]
    async fn test_operator_policy_extension() {
        let router = test_router(&[("s1", "http://127.0.0.1:1")]);
        router.forbid_query("(?i:into)").unwrap();
        assert!(matches!(
            router.check_query("select usage into cpu2 from cpu where time > 0"),
            Err(Error::QueryForbidden)
        ));

        router.ensure_query("(?i:limit)").unwrap();
        assert!(router.check_query("select usage from cpu limit 10").is_ok());
        router.close();
    }

    #[tokio::test]
    async fn test_bad_row_does_not_stop_batch() {
        // backend is unreachable; only dispatch failures and scan
        // failures are counted, and both rows after the bad one still
        // get dispatched
        let router = test_router(&[("s1", "http://127.0.0.1:1")]);
        let body = b"cpu value=1 10\nno_delimiter\nmem value=2 20\n";
        router.write(body, "db=test", None).await;

        let stats = router.stats().live();
        assert_eq!(stats.write_requests.load(Ordering::Relaxed), 1);
        // three rows seen, all three failed (one scan error, two refused)
        assert_eq!(stats.points_written.load(Ordering::Relaxed), 3);
        assert_eq!(stats.points_written_fail.load(Ordering::Relaxed), 3);
        router.close();
    }

    #[tokio::test]
    async fn test_query_forbidden_counts_failure() {
        let router = test_router(&[("s1", "http://127.0.0.1:1")]);
        let err = router
            .query("GET", "db=test&q=select+*+from+cpu", "select * from cpu", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QueryForbidden));

        let stats = router.stats().live();
        assert_eq!(stats.query_requests.load(Ordering::Relaxed), 1);
        assert_eq!(stats.query_requests_fail.load(Ordering::Relaxed), 1);
        router.close();
    }
}
