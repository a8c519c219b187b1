use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use detrack::connection::monitor_rpc;
use detrack::ingest::Announcer;
use detrack::ingest::announcer::INGEST_SERVICE;
use detrack::services::parse_endpoint;

mod common;

#[derive(Parser, Debug)]
#[command(name = "detrack-announce", about = "Registers a frame source with an ingest server")]
struct Args {
    /// Ingest service address
    #[arg(long, value_name = "HOST:PORT")]
    ingest: String,
    /// Endpoint the ingest server should pull frames from
    #[arg(long, value_name = "HOST:PORT")]
    endpoint: String,
    /// Seconds between registrations
    #[arg(long, default_value_t = 5)]
    interval: u64,
    #[command(flatten)]
    common: common::CommonArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let rt = args.common.init()?;
    parse_endpoint(&args.endpoint)?;

    let ingest = monitor_rpc(INGEST_SERVICE, &args.ingest, &rt.connection);
    let announcer = Announcer::new(
        ingest,
        args.endpoint.clone(),
        Duration::from_secs(args.interval.max(1)),
        rt.metrics.clone(),
    );
    announcer
        .run(async {
            if common::wait_for_ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}
