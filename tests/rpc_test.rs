use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use detrack::config::{ConnectionConfig, IngestConfig};
use detrack::connection::{ConnectionHandle, ConnectionMonitor, LinkState, TcpConnector};
use detrack::error::Error;
use detrack::frame::{FrameMetadata, encode_jpeg, now_timestamp};
use detrack::frame::SourceId;
use detrack::ingest::{DirSourceFactory, Dispatcher, FrameSource, RoutingPolicy, SourceFactory};
use detrack::metrics::{Histogram, Registry};
use detrack::rpc::{self, PipelineService, RpcClient, STATUS_OK, measure, observe_call, timing::parse_timestamp};
use detrack::services::{DetectorService, IngestService, TrackerService};
use detrack::tracker::{EngineConfig, Rect, SingleTargetTracker, TrackerEngine};
use detrack::{BlobConfig, BlobDetector, Snapshots};
use image::{Rgb, RgbImage};
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn spawn_service<S: PipelineService>(service: Arc<S>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(rpc::serve(listener, service, std::future::pending()));
    addr
}

fn frame_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("detrack-rpc-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..3 {
        RgbImage::new(16, 16).save(dir.join(format!("{i:03}.png"))).unwrap();
    }
    dir
}

fn ingest_service(dir: &std::path::Path, metrics: Arc<Registry>) -> IngestService<DirSourceFactory> {
    let dispatcher = Dispatcher::new(
        Arc::new(ConnectionHandle::new("detector")),
        Arc::new(ConnectionHandle::new("tracker")),
        RoutingPolicy::new(20, true),
        tokio::runtime::Handle::current(),
        metrics.clone(),
    );
    let config = IngestConfig {
        frame_rate: 100.0,
        image_width: 16,
        image_height: 16,
        ..Default::default()
    };
    IngestService::new(DirSourceFactory::new(dir), config, dispatcher, metrics).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_register_source_is_acknowledged_once() {
    let metrics = Arc::new(Registry::default());
    let service = Arc::new(ingest_service(&frame_dir("register"), metrics.clone()));
    let addr = spawn_service(service.clone()).await;
    let client = RpcClient::connect(&addr, TIMEOUT).await.unwrap();

    let before = Utc::now();
    let outcome = client.register_source("10.0.0.5:9000").await.unwrap();
    assert_eq!(outcome.ack.status, STATUS_OK);
    let received = parse_timestamp("received", &outcome.ack.received_timestamp).unwrap();
    assert!(received >= before);
    assert!(outcome.sent_bytes > 8);

    let rt = observe_call(metrics.as_ref(), "ingest", &outcome).unwrap();
    assert!(rt.e2e_ms >= 0.0);
    assert!(metrics.snapshot().histogram(Histogram::TransitMs, "ingest").is_some());

    client.register_source("10.0.0.5:9000").await.unwrap();
    assert_eq!(service.endpoints(), vec!["10.0.0.5:9000".to_string()]);
    assert_eq!(service.source_ids(), vec!["rtsp://10.0.0.5:9000/stream".to_string()]);

    let reports = tokio::task::spawn_blocking(move || service.shutdown()).await.unwrap();
    assert_eq!(reports.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_registration_is_error() {
    let service = Arc::new(ingest_service(&frame_dir("malformed"), Arc::new(Registry::default())));
    let addr = spawn_service(service.clone()).await;
    let client = RpcClient::connect(&addr, TIMEOUT).await.unwrap();

    match client.register_source("no-port-here").await {
        Err(Error::Remote(message)) => assert!(message.contains("invalid payload")),
        other => panic!("expected an error reply, got {other:?}"),
    }
    assert!(service.endpoints().is_empty());
    assert!(client.is_ready());
}

#[tokio::test]
async fn test_calls_are_multiplexed() {
    struct Echo;
    impl PipelineService for Echo {
        async fn submit_frame(&self, request: rpc::FrameData) -> rpc::Reply {
            let received = now_timestamp();
            // Later frames answer first.
            let delay = 50u64.saturating_sub(request.frame.len() as u64 * 10);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            rpc::Reply::ok(request.sent_timestamp, received)
        }
    }

    let addr = spawn_service(Arc::new(Echo)).await;
    let client = Arc::new(RpcClient::connect(&addr, TIMEOUT).await.unwrap());
    let calls: Vec<_> = (0..5u64)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                let meta = FrameMetadata {
                    source_id: "cam".into(),
                    frame_id: i + 1,
                    timestamp: now_timestamp(),
                };
                let outcome = client.submit_frame(&meta, vec![0; i as usize]).await.unwrap();
                measure(&outcome.ack, outcome.completed_at).unwrap()
            })
        })
        .collect();
    for call in calls {
        let rt = call.await.unwrap();
        assert!(rt.e2e_ms >= rt.transit_ms - 1e-6);
    }
}

#[tokio::test]
async fn test_client_notices_closed_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let client = RpcClient::connect(&addr, TIMEOUT).await.unwrap();
    server.await.unwrap();
    for _ in 0..100 {
        if !client.is_ready() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!client.is_ready());
    assert!(matches!(client.register_source("a:1").await, Err(Error::Disconnected)));
}

#[tokio::test]
async fn test_monitor_connects_and_clears() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    struct Nothing;
    impl PipelineService for Nothing {}
    let server = tokio::spawn(rpc::serve(listener, Arc::new(Nothing), std::future::pending()));

    let config = ConnectionConfig {
        probe_timeout_ms: 500,
        ..Default::default()
    };
    let handle = Arc::new(ConnectionHandle::<RpcClient>::new("tracker"));
    let monitor = ConnectionMonitor::new(handle.clone(), TcpConnector::new(&addr, &config), Duration::from_millis(50));

    assert_eq!(monitor.tick().await, LinkState::Connected);
    assert!(handle.load().is_some_and(|c| c.is_ready()));
    assert_eq!(monitor.tick().await, LinkState::Ready);

    server.abort();
    let _ = server.await;
    // The listener is gone, so the probe fails and the handle empties.
    assert_eq!(monitor.tick().await, LinkState::Unreachable);
    assert!(handle.load().is_none());
}

/// Reports the box it was started on for as long as it lives.
struct Still(Option<Rect>);

impl SingleTargetTracker for Still {
    fn init(&mut self, _image: &RgbImage, bbox: Rect) {
        self.0 = Some(bbox);
    }

    fn update(&mut self, _image: &RgbImage) -> Option<Rect> {
        self.0
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_detections_reach_tracker() {
    let metrics = Arc::new(Registry::default());
    let engine = Arc::new(TrackerEngine::new(Arc::new(|| Still(None)), EngineConfig::default()));
    let tracker_addr = spawn_service(Arc::new(TrackerService::new(engine.clone(), metrics.clone()))).await;

    let tracker = Arc::new(ConnectionHandle::new("tracker"));
    tracker.store(Arc::new(RpcClient::connect(&tracker_addr, TIMEOUT).await.unwrap()));
    let detector = BlobDetector::new(BlobConfig {
        threshold: Some(128),
        ..Default::default()
    });
    let detector_addr = spawn_service(Arc::new(DetectorService::new(detector, tracker, metrics.clone()))).await;

    let mut image = RgbImage::new(64, 48);
    for y in 10..30 {
        for x in 20..40 {
            image.put_pixel(x, y, Rgb([255, 255, 255]));
        }
    }
    let jpeg = encode_jpeg(&image, 95).unwrap();
    let meta = FrameMetadata {
        source_id: "cam".into(),
        frame_id: 1,
        timestamp: now_timestamp(),
    };

    let client = RpcClient::connect(&detector_addr, TIMEOUT).await.unwrap();
    let outcome = client.submit_frame(&meta, jpeg.clone()).await.unwrap();
    assert_eq!(outcome.ack.status, STATUS_OK);

    let mut tracks = Vec::new();
    for _ in 0..200 {
        tracks = engine.tracks("cam");
        if !tracks.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(tracks.len(), 1);
    let (_, bbox) = tracks[0];
    assert!(bbox.iou(&Rect::new(20.0, 10.0, 40.0, 30.0)) > 0.8);

    // An undecodable frame is still acknowledged and changes nothing.
    let tracker_client = RpcClient::connect(&tracker_addr, TIMEOUT).await.unwrap();
    let ack = tracker_client
        .submit_frame(
            &FrameMetadata {
                source_id: "cam".into(),
                frame_id: 2,
                timestamp: "later".into(),
            },
            b"not a jpeg".to_vec(),
        )
        .await
        .unwrap();
    assert_eq!(ack.ack.status, STATUS_OK);
    assert_eq!(engine.tracks("cam").len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tracker_snapshots_every_nth_frame() {
    let dir = std::env::temp_dir().join(format!("detrack-rpc-snapshots-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();

    let engine = Arc::new(TrackerEngine::new(Arc::new(|| Still(None)), EngineConfig::default()));
    let image = RgbImage::new(64, 48);
    engine.associate("cam", 1, &image, &[Rect::new(10.0, 10.0, 30.0, 30.0)]);
    let service = TrackerService::new(engine, Arc::new(Registry::default()))
        .with_track_snapshots(Some(Snapshots::new(&dir, 3, "track")));
    let addr = spawn_service(Arc::new(service)).await;
    let client = RpcClient::connect(&addr, TIMEOUT).await.unwrap();

    let jpeg = encode_jpeg(&image, 90).unwrap();
    let saved = |frame_id: u64| {
        let suffix = format!("_f{frame_id}_track.jpg");
        std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().ends_with(&suffix))
    };

    for frame_id in [2u64, 3] {
        let meta = FrameMetadata {
            source_id: "cam".into(),
            frame_id,
            timestamp: now_timestamp(),
        };
        client.submit_frame(&meta, jpeg.clone()).await.unwrap();
    }

    for _ in 0..200 {
        if saved(3) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(saved(3));
    assert!(!saved(2));

    let written = std::fs::read_dir(&dir).unwrap().next().unwrap().unwrap().path();
    let snapshot = image::open(written).unwrap().to_rgb8();
    // The live track is outlined in green.
    let corner = snapshot.get_pixel(10, 10);
    assert!(corner[1] > 120 && corner[1] > corner[0] + 60, "{corner:?}");
}

/// Takes its time opening, like a camera that is slow to answer.
struct SlowFactory(DirSourceFactory);

impl SourceFactory for SlowFactory {
    fn open(&self, host: &str, port: u16) -> detrack::Result<(SourceId, Box<dyn FrameSource>)> {
        std::thread::sleep(Duration::from_millis(300));
        self.0.open(host, port)
    }
}

#[tokio::test]
async fn test_slow_source_open_does_not_stall_server() {
    let dir = frame_dir("slow-open");
    let metrics = Arc::new(Registry::default());
    let dispatcher = Dispatcher::new(
        Arc::new(ConnectionHandle::<RpcClient>::new("detector")),
        Arc::new(ConnectionHandle::new("tracker")),
        RoutingPolicy::new(20, true),
        tokio::runtime::Handle::current(),
        metrics.clone(),
    );
    let config = IngestConfig {
        image_width: 16,
        image_height: 16,
        ..Default::default()
    };
    let service = Arc::new(IngestService::new(SlowFactory(DirSourceFactory::new(&dir)), config, dispatcher, metrics).unwrap());
    let addr = spawn_service(service.clone()).await;
    let client = Arc::new(RpcClient::connect(&addr, TIMEOUT).await.unwrap());

    let slow = {
        let client = client.clone();
        tokio::spawn(async move { client.register_source("10.0.0.7:9000").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Single-threaded runtime: this only answers quickly if the open runs off it.
    let started = std::time::Instant::now();
    assert!(client.register_source("bad").await.is_err());
    assert!(started.elapsed() < Duration::from_millis(200), "{:?}", started.elapsed());
    assert!(!slow.is_finished());

    assert_eq!(slow.await.unwrap().unwrap().ack.status, STATUS_OK);
    assert_eq!(service.endpoints(), vec!["10.0.0.7:9000".to_string()]);
    let reports = tokio::task::spawn_blocking(move || service.shutdown()).await.unwrap();
    assert_eq!(reports.len(), 1);
}
