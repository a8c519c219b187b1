use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use detrack::Snapshots;
use detrack::services::TrackerService;
use detrack::tracker::{EngineConfig, TemplateConfig, TemplateTracker, TrackerEngine};

mod common;

#[derive(Parser, Debug)]
#[command(name = "detrack-tracker", about = "Associates detections with tracks and follows them frame by frame")]
struct Args {
    /// Address to serve on
    #[arg(long, default_value = "0.0.0.0:50053")]
    listen: String,
    /// Detections match a track only above this IoU
    #[arg(long, default_value_t = 0.5)]
    iou_threshold: f32,
    /// Search area around the predicted position, as a fraction of the box size
    #[arg(long, default_value_t = 1.0)]
    search_margin: f32,
    /// Minimum template correlation to keep following a target
    #[arg(long, default_value_t = 0.7)]
    min_score: f32,
    /// Directory for debug snapshots with the live tracks drawn
    #[arg(long, value_name = "DIR")]
    save_image_dir: Option<PathBuf>,
    /// Save every n-th tracked frame; 0 disables
    #[arg(long, default_value_t = 100)]
    save_image_frequency: u64,
    /// Save every n-th frame after associating detections; 0 disables
    #[arg(long, default_value_t = 20)]
    save_detection_image_frequency: u64,
    #[command(flatten)]
    common: common::CommonArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let rt = args.common.init()?;

    let template = TemplateConfig {
        search_margin: args.search_margin,
        min_score: args.min_score,
    };
    let engine = TrackerEngine::new(
        Arc::new(move || TemplateTracker::new(template.clone())),
        EngineConfig {
            iou_threshold: args.iou_threshold,
        },
    );
    let dir = args.save_image_dir.as_deref();
    if let Some(dir) = dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let service = TrackerService::new(Arc::new(engine), rt.metrics.clone())
        .with_track_snapshots(Snapshots::from_options(dir, args.save_image_frequency, "track"))
        .with_detection_snapshots(Snapshots::from_options(dir, args.save_detection_image_frequency, "detect"));

    common::serve_until_ctrl_c(&args.listen, Arc::new(service)).await
}
