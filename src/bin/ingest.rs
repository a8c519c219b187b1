use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use detrack::config::load_json;
use detrack::connection::monitor_rpc;
use detrack::ingest::{DETECTOR_SERVICE, DirSourceFactory, Dispatcher, RoutingPolicy, TRACKER_SERVICE};
use detrack::services::IngestService;
use detrack::IngestConfig;
use tracing::info;

mod common;

#[derive(Parser, Debug)]
#[command(name = "detrack-ingest", about = "Pulls frames from registered sources and routes them to detection and tracking")]
struct Args {
    /// Address to serve on
    #[arg(long, default_value = "0.0.0.0:50051")]
    listen: String,
    /// Detector service address
    #[arg(long, value_name = "HOST:PORT")]
    detector: String,
    /// Tracker service address
    #[arg(long, value_name = "HOST:PORT")]
    tracker: String,
    /// Directory of images played for every registered source
    #[arg(long, value_name = "DIR")]
    frames: PathBuf,
    /// JSON file overriding ingestion settings
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long)]
    frame_rate: Option<f64>,
    #[arg(long)]
    queue_size: Option<usize>,
    /// Stop each source after this many frames; 0 means unlimited
    #[arg(long)]
    max_frames: Option<u64>,
    /// Every n-th frame goes to the detector
    #[arg(long)]
    detection_frequency: Option<u64>,
    #[command(flatten)]
    common: common::CommonArgs,
}

impl Args {
    fn ingest_config(&self) -> Result<IngestConfig> {
        let mut config = match &self.config {
            Some(path) => load_json(path)?,
            None => IngestConfig::default(),
        };
        if let Some(v) = self.frame_rate {
            config.frame_rate = v;
        }
        if let Some(v) = self.queue_size {
            config.queue_size = v;
        }
        if let Some(v) = self.max_frames {
            config.max_frames = v;
        }
        if let Some(v) = self.detection_frequency {
            config.detection_frequency = v;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let rt = args.common.init()?;
    let config = args.ingest_config()?;
    if !args.frames.is_dir() {
        bail!("frame directory {} does not exist", args.frames.display());
    }

    let detector = monitor_rpc(DETECTOR_SERVICE, &args.detector, &rt.connection);
    let tracker = monitor_rpc(TRACKER_SERVICE, &args.tracker, &rt.connection);
    let dispatcher = Dispatcher::new(
        detector,
        tracker,
        RoutingPolicy::from_config(&config),
        tokio::runtime::Handle::current(),
        rt.metrics.clone(),
    );
    let service = Arc::new(
        IngestService::new(DirSourceFactory::new(&args.frames), config, dispatcher, rt.metrics.clone())
            .context("invalid ingestion settings")?,
    );

    common::serve_until_ctrl_c(&args.listen, service.clone()).await?;

    let reports = tokio::task::spawn_blocking(move || service.shutdown()).await?;
    for report in reports {
        info!(
            source = %report.source_id,
            read = report.frames_read,
            detector = report.to_detector,
            tracker = report.to_tracker,
            skipped = report.skipped,
            "final report"
        );
    }
    info!("{}", rt.metrics.snapshot());
    Ok(())
}
