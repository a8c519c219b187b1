//! Ingest server: one ingestion pipeline per registered endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::frame::{SourceId, now_timestamp};
use crate::ingest::{Dispatcher, FrameClient, IngestHandle, IngestPipeline, IngestReport, SourceFactory};
use crate::metrics::MetricsSink;
use crate::rpc::{Data, PipelineService, Reply, RpcClient};

/// Split a `host:port` registration payload.
pub fn parse_endpoint(payload: &str) -> Result<(&str, u16)> {
    let invalid = || Error::InvalidPayload(payload.to_string());
    let mut parts = payload.split(':');
    let (Some(host), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse().map_err(|_| invalid())?;
    Ok((host, port))
}

pub struct IngestService<F, C = RpcClient> {
    inner: Arc<Sources<F, C>>,
}

struct Sources<F, C> {
    factory: F,
    config: IngestConfig,
    dispatcher: Dispatcher<C>,
    metrics: Arc<dyn MetricsSink>,
    /// Keyed by the registered `host:port`.
    running: Mutex<BTreeMap<String, IngestHandle>>,
}

impl<F: SourceFactory, C: FrameClient> IngestService<F, C> {
    pub fn new(factory: F, config: IngestConfig, dispatcher: Dispatcher<C>, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Sources {
                factory,
                config,
                dispatcher,
                metrics,
                running: Mutex::new(BTreeMap::new()),
            }),
        })
    }

    /// Register an endpoint, starting its pipeline the first time it is
    /// seen. Returns whether a new pipeline was started. Opens the source
    /// and spawns threads, so it blocks.
    pub fn register(&self, payload: &str) -> Result<bool> {
        self.inner.register(payload)
    }

    /// Registered endpoints, sorted.
    pub fn endpoints(&self) -> Vec<String> {
        self.inner.running.lock().keys().cloned().collect()
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.inner.running.lock().values().map(|h| h.source_id().to_string()).collect()
    }

    /// Stop every pipeline and wait for them. Blocks.
    pub fn shutdown(&self) -> Vec<IngestReport> {
        let handles: Vec<IngestHandle> = std::mem::take(&mut *self.inner.running.lock()).into_values().collect();
        for handle in &handles {
            handle.close();
        }
        handles
            .into_iter()
            .filter_map(|handle| match handle.wait() {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("pipeline did not stop cleanly: {e}");
                    None
                }
            })
            .collect()
    }
}

impl<F: SourceFactory, C: FrameClient> Sources<F, C> {
    fn register(&self, payload: &str) -> Result<bool> {
        let (host, port) = parse_endpoint(payload)?;
        let key = format!("{host}:{port}");

        let mut running = self.running.lock();
        if running.contains_key(&key) {
            return Ok(false);
        }
        let (source_id, source) = self.factory.open(host, port)?;
        let handle = IngestPipeline::start(
            source_id.clone(),
            source,
            self.config.clone(),
            self.dispatcher.clone(),
            self.metrics.clone(),
        )?;
        info!(endpoint = %key, source = %source_id, "added new client");
        running.insert(key, handle);
        Ok(true)
    }
}

impl<F: SourceFactory, C: FrameClient> PipelineService for IngestService<F, C> {
    async fn register_source(&self, request: Data) -> Reply {
        let received = now_timestamp();
        let inner = self.inner.clone();
        let payload = request.payload.clone();
        let registered = tokio::task::spawn_blocking(move || inner.register(&payload))
            .await
            .unwrap_or_else(|e| Err(Error::Source(format!("registration task failed: {e}"))));
        match registered {
            Ok(_) => {}
            Err(e @ Error::InvalidPayload(_)) => {
                warn!("{e}");
                return Reply::error(e.to_string());
            }
            // The registration itself was understood; the caller will retry.
            Err(e) => warn!(endpoint = %request.payload, "failed to start ingestion: {e}"),
        }
        Reply::ok(request.sent_timestamp, received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(parse_endpoint("10.0.0.5:9000").unwrap(), ("10.0.0.5", 9000));
        for bad in ["10.0.0.5", "a:b:c", ":9000", "host:port", "host:70000", ""] {
            assert!(
                matches!(parse_endpoint(bad), Err(Error::InvalidPayload(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
