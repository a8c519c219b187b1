//! Flags and startup shared by every binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use detrack::ConnectionConfig;
use detrack::config::load_json;
use detrack::metrics::{BucketConfig, Registry};
use detrack::rpc::{self, PipelineService};
use detrack::telemetry;
use tracing::info;

#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Default log level; `RUST_LOG` overrides it
    #[arg(long, default_value = "info")]
    pub log_level: String,
    /// JSON file overriding connection monitor and call timeouts
    #[arg(long, value_name = "PATH")]
    pub connection_config: Option<PathBuf>,
    /// Comma separated histogram bounds for sent bytes
    #[arg(long, default_value = "")]
    pub sent_data_buckets: String,
    /// Comma separated histogram bounds for processing time (ms)
    #[arg(long, default_value = "")]
    pub proc_time_buckets: String,
    /// Comma separated histogram bounds for transit and end-to-end time (ms)
    #[arg(long, default_value = "")]
    pub rtt_time_buckets: String,
    /// Seconds between metric summaries in the log
    #[arg(long, default_value_t = 30)]
    pub metrics_interval: u64,
}

pub struct Runtime {
    pub metrics: Arc<Registry>,
    pub connection: ConnectionConfig,
}

impl CommonArgs {
    /// Install logging, build the metric registry and start its reporter.
    pub fn init(&self) -> Result<Runtime> {
        telemetry::init_logging(&self.log_level);

        let connection = match &self.connection_config {
            Some(path) => load_json(path)?,
            None => ConnectionConfig::default(),
        };
        connection.validate()?;

        let buckets = BucketConfig::from_lists(&self.sent_data_buckets, &self.proc_time_buckets, &self.rtt_time_buckets)
            .context("invalid histogram buckets")?;
        let metrics = Arc::new(Registry::new(buckets));
        tokio::spawn(telemetry::report_metrics(
            metrics.clone(),
            Duration::from_secs(self.metrics_interval.max(1)),
        ));

        Ok(Runtime { metrics, connection })
    }
}

pub async fn wait_for_ctrl_c() -> Result<()> {
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutting down");
    Ok(())
}

/// Bind `addr` and serve `service` until ctrl-c. A bind failure is fatal.
#[allow(dead_code)]
pub async fn serve_until_ctrl_c<S: PipelineService>(addr: &str, service: Arc<S>) -> Result<()> {
    let listener = rpc::bind(addr)
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;
    rpc::serve(listener, service, async {
        if let Err(e) = wait_for_ctrl_c().await {
            tracing::error!("{e:#}");
            std::future::pending::<()>().await;
        }
    })
    .await?;
    Ok(())
}
