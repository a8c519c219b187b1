//! Periodic self-registration of a frame producer with an ingest server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::connection::ConnectionHandle;
use crate::error::{Error, Result};
use crate::metrics::MetricsSink;
use crate::rpc::{RoundTrip, RpcClient, observe_call};

pub const INGEST_SERVICE: &str = "ingest";

pub struct Announcer {
    ingest: Arc<ConnectionHandle<RpcClient>>,
    endpoint: String,
    interval: Duration,
    metrics: Arc<dyn MetricsSink>,
}

impl Announcer {
    /// `endpoint` is the `host:port` the ingest server should pull frames from.
    pub fn new(
        ingest: Arc<ConnectionHandle<RpcClient>>,
        endpoint: impl Into<String>,
        interval: Duration,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            ingest,
            endpoint: endpoint.into(),
            interval,
            metrics,
        }
    }

    /// Send one registration.
    pub async fn announce(&self) -> Result<Option<RoundTrip>> {
        let client = self
            .ingest
            .load()
            .ok_or_else(|| Error::NotConnected(self.ingest.name().to_string()))?;
        let outcome = client.register_source(&self.endpoint).await?;
        Ok(observe_call(self.metrics.as_ref(), INGEST_SERVICE, &outcome))
    }

    /// Announce every interval until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(endpoint = %self.endpoint, "announcing source");
        loop {
            match self.announce().await {
                Ok(rt) => debug!(
                    endpoint = %self.endpoint,
                    transit_ms = rt.map(|rt| rt.transit_ms),
                    "registration acknowledged"
                ),
                Err(e) => warn!(endpoint = %self.endpoint, "registration failed: {e}"),
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
