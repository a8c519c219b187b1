use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use detrack::connection::monitor_rpc;
use detrack::ingest::TRACKER_SERVICE;
use detrack::services::DetectorService;
use detrack::{BlobConfig, BlobDetector, Snapshots};

mod common;

#[derive(Parser, Debug)]
#[command(name = "detrack-detector", about = "Detects objects in submitted frames and forwards them to the tracker")]
struct Args {
    /// Address to serve on
    #[arg(long, default_value = "0.0.0.0:50052")]
    listen: String,
    /// Tracker service address
    #[arg(long, value_name = "HOST:PORT")]
    tracker: String,
    /// Fixed foreground threshold (0-255); Otsu per frame when omitted
    #[arg(long)]
    threshold: Option<u8>,
    /// Detect dark objects on a bright background
    #[arg(long)]
    invert: bool,
    /// Smallest blob, in pixels, reported as a detection
    #[arg(long, default_value_t = 64)]
    min_area: u32,
    #[arg(long, default_value_t = 200)]
    max_detections: usize,
    /// Directory for debug snapshots with the detections drawn
    #[arg(long, value_name = "DIR")]
    save_image_dir: Option<PathBuf>,
    /// Save every n-th frame; 0 disables snapshots
    #[arg(long, default_value_t = 100)]
    save_image_frequency: u64,
    #[command(flatten)]
    common: common::CommonArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let rt = args.common.init()?;

    let tracker = monitor_rpc(TRACKER_SERVICE, &args.tracker, &rt.connection);
    let detector = BlobDetector::new(BlobConfig {
        threshold: args.threshold,
        invert: args.invert,
        min_area: args.min_area,
        max_detections: args.max_detections,
    });
    let snapshots = Snapshots::from_options(args.save_image_dir.as_deref(), args.save_image_frequency, "detector");
    if let Some(snapshots) = &snapshots {
        std::fs::create_dir_all(snapshots.dir())
            .with_context(|| format!("creating {}", snapshots.dir().display()))?;
    }
    let service = Arc::new(DetectorService::new(detector, tracker, rt.metrics.clone()).with_snapshots(snapshots));

    common::serve_until_ctrl_c(&args.listen, service).await
}
