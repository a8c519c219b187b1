//! Per-source ingestion: a reader thread filling the frame queue at the
//! target rate, a sender thread draining it, and a supervisor that closes the
//! capture once both have stopped.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, select};
use image::imageops::{self, FilterType};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::dispatch::{Dispatcher, FrameClient, InFlight, Route};
use super::pacer::Pacer;
use super::queue::{FrameReceiver, FrameSender, frame_queue};
use super::source::FrameSource;
use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::frame::{Frame, SourceId, encode_jpeg};
use crate::metrics::{FrameOutcome, MetricsSink};

/// One-shot, idempotent stop signal observable from any thread.
#[derive(Debug)]
pub struct ShutdownSignal {
    trigger: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            trigger: Mutex::new(Some(tx)),
            rx,
        }
    }
}

impl ShutdownSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn trigger(&self) -> bool {
        self.trigger.lock().take().is_some()
    }

    pub fn is_triggered(&self) -> bool {
        self.trigger.lock().is_none()
    }

    /// Sleep up to `timeout`, waking early on shutdown. Returns whether the
    /// signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        !matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }

    /// Becomes disconnected once the signal fires.
    pub fn channel(&self) -> &Receiver<()> {
        &self.rx
    }
}

/// Why the reader stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    MaxFrames,
    TooManyEmptyReads,
    Closed,
    /// The reader thread panicked.
    Crashed,
}

/// Totals for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub source_id: SourceId,
    pub reason: StopReason,
    /// Frames read from the source.
    pub frames_read: u64,
    /// Failed reads.
    pub empty_reads: u64,
    /// Frames dropped on a full queue or a failed encode.
    pub skipped: u64,
    pub to_detector: u64,
    pub to_tracker: u64,
    /// Queued frames released unsent at shutdown.
    pub released: u64,
    /// Reader iterations that overran the frame period.
    pub backlog: u64,
    /// Whether every in-flight send finished within the grace period.
    pub sends_settled: bool,
}

#[derive(Debug, Default)]
struct ReaderStats {
    frames_read: u64,
    empty_reads: u64,
    backlog: u64,
    queue_skips: u64,
}

/// What the reader thread hands back. The source travels with it so the
/// supervisor can close it after the sender has stopped too.
struct ReaderExit {
    source: Box<dyn FrameSource>,
    stats: ReaderStats,
    reason: StopReason,
}

#[derive(Debug, Default)]
struct SenderStats {
    encode_failures: u64,
    to_detector: u64,
    to_tracker: u64,
    released: u64,
}

/// The queue comes back with the stats so frames pushed after the sender's
/// last drain are still counted once the reader is gone.
struct SenderExit {
    queue: FrameReceiver,
    stats: SenderStats,
}

pub struct IngestPipeline;

impl IngestPipeline {
    /// Validate `config` and start the reader, sender and supervisor threads.
    pub fn start<C: FrameClient>(
        source_id: impl Into<SourceId>,
        source: Box<dyn FrameSource>,
        config: IngestConfig,
        dispatcher: Dispatcher<C>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<IngestHandle> {
        config.validate()?;
        let source_id = source_id.into();
        let shutdown = ShutdownSignal::new();
        let in_flight = InFlight::new();
        let (frames_tx, frames_rx) = frame_queue(config.queue_size);

        let reader = Reader {
            source_id: source_id.clone(),
            source,
            queue: frames_tx,
            config: config.clone(),
            shutdown: shutdown.clone(),
            metrics: metrics.clone(),
        };
        let reader = thread::Builder::new()
            .name(format!("ingest-reader-{}", short_name(&source_id)))
            .spawn(move || reader.run())?;

        let sender = SenderLoop {
            source_id: source_id.clone(),
            queue: frames_rx,
            dispatcher,
            jpeg_quality: config.jpeg_quality,
            shutdown: shutdown.clone(),
            in_flight: in_flight.clone(),
            metrics,
        };
        let sender = thread::Builder::new()
            .name(format!("ingest-sender-{}", short_name(&source_id)))
            .spawn(move || sender.run());
        let sender = match sender {
            Ok(sender) => sender,
            Err(e) => {
                shutdown.trigger();
                let _ = reader.join();
                return Err(e.into());
            }
        };

        let supervisor_id = source_id.clone();
        let grace = config.send_grace();
        let supervisor = thread::Builder::new()
            .name(format!("ingest-supervisor-{}", short_name(&source_id)))
            .spawn(move || supervise(supervisor_id, reader, sender, in_flight, grace))?;

        info!(source = %source_id, fps = config.frame_rate, queue = config.queue_size, "ingestion started");
        Ok(IngestHandle {
            source_id,
            shutdown,
            supervisor,
        })
    }
}

/// Thread names are limited in length on some platforms.
fn short_name(source_id: &str) -> String {
    source_id.chars().rev().take(12).collect::<Vec<_>>().into_iter().rev().collect()
}

/// Control over a running pipeline.
#[derive(Debug)]
pub struct IngestHandle {
    source_id: SourceId,
    shutdown: Arc<ShutdownSignal>,
    supervisor: JoinHandle<IngestReport>,
}

impl IngestHandle {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Ask the pipeline to stop. Safe to call any number of times.
    pub fn close(&self) {
        if self.shutdown.trigger() {
            info!(source = %self.source_id, "ingestion closing");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }

    /// Block until the pipeline has fully stopped.
    pub fn wait(self) -> Result<IngestReport> {
        self.supervisor
            .join()
            .map_err(|_| Error::Source(format!("supervisor for {} panicked", self.source_id)))
    }

    /// `close` followed by `wait`.
    pub fn stop(self) -> Result<IngestReport> {
        self.close();
        self.wait()
    }
}

struct Reader {
    source_id: SourceId,
    source: Box<dyn FrameSource>,
    queue: FrameSender,
    config: IngestConfig,
    shutdown: Arc<ShutdownSignal>,
    metrics: Arc<dyn MetricsSink>,
}

impl Reader {
    fn run(mut self) -> ReaderExit {
        let mut pacer = Pacer::new(self.config.frame_period());
        let mut stats = ReaderStats::default();
        let mut frame_id = 0u64;
        let mut empty_streak = 0u32;

        let reason = loop {
            if self.shutdown.is_triggered() {
                break StopReason::Closed;
            }
            let started = Instant::now();

            match self.source.next() {
                Err(e) => {
                    empty_streak += 1;
                    stats.empty_reads += 1;
                    self.metrics.frame(FrameOutcome::Empty);
                    warn!(source = %self.source_id, streak = empty_streak, "frame read failed: {e}");
                    if empty_streak >= self.config.empty_frame_limit {
                        error!(source = %self.source_id, "too many consecutive empty reads, stopping");
                        self.shutdown.trigger();
                        break StopReason::TooManyEmptyReads;
                    }
                    if self.shutdown.wait_timeout(self.config.empty_retry_delay()) {
                        break StopReason::Closed;
                    }
                    continue;
                }
                Ok(None) => {
                    info!(source = %self.source_id, frames = frame_id, "end of stream");
                    break StopReason::EndOfStream;
                }
                Ok(Some(image)) => {
                    empty_streak = 0;
                    frame_id += 1;
                    stats.frames_read += 1;
                    self.metrics.frame(FrameOutcome::All);

                    let (w, h) = (self.config.image_width, self.config.image_height);
                    let image = if image.dimensions() == (w, h) {
                        image
                    } else {
                        imageops::resize(&image, w, h, FilterType::Triangle)
                    };
                    let frame = Frame {
                        image,
                        source_id: self.source_id.clone(),
                        frame_id,
                        timestamp: Utc::now(),
                    };
                    if !self.queue.push(frame) {
                        self.metrics.frame(FrameOutcome::Skipped);
                        debug!(source = %self.source_id, frame = frame_id, "queue full, frame dropped");
                    }
                }
            }

            if self.config.max_frames > 0 && frame_id >= self.config.max_frames {
                info!(source = %self.source_id, frames = frame_id, "frame limit reached");
                break StopReason::MaxFrames;
            }

            let sleep = pacer.sleep_for(started.elapsed());
            if !sleep.is_zero() && self.shutdown.wait_timeout(sleep) {
                break StopReason::Closed;
            }
        };

        stats.backlog = pacer.backlog();
        stats.queue_skips = self.queue.skipped();
        ReaderExit {
            source: self.source,
            stats,
            reason,
        }
    }
}

struct SenderLoop<C> {
    source_id: SourceId,
    queue: FrameReceiver,
    dispatcher: Dispatcher<C>,
    jpeg_quality: u8,
    shutdown: Arc<ShutdownSignal>,
    in_flight: Arc<InFlight>,
    metrics: Arc<dyn MetricsSink>,
}

impl<C: FrameClient> SenderLoop<C> {
    fn run(self) -> SenderExit {
        let mut stats = SenderStats::default();
        loop {
            if self.shutdown.is_triggered() {
                stats.released = self.queue.drain() as u64;
                break;
            }
            select! {
                recv(self.queue.channel()) -> msg => {
                    match msg {
                        Ok(frame) => self.send(frame, &mut stats),
                        // Reader finished and the queue is empty.
                        Err(_) => break,
                    }
                }
                recv(self.shutdown.channel()) -> _ => {
                    stats.released = self.queue.drain() as u64;
                    break;
                }
            }
        }
        if stats.released > 0 {
            debug!(source = %self.source_id, released = stats.released, "released queued frames");
        }
        SenderExit {
            queue: self.queue,
            stats,
        }
    }

    fn send(&self, frame: Frame, stats: &mut SenderStats) {
        let metadata = frame.metadata();
        let encoded = encode_jpeg(&frame.image, self.jpeg_quality);
        drop(frame);

        let jpeg = match encoded {
            Ok(jpeg) => jpeg,
            Err(e) => {
                stats.encode_failures += 1;
                self.metrics.frame(FrameOutcome::Skipped);
                warn!(source = %self.source_id, frame = metadata.frame_id, "encode failed: {e}");
                return;
            }
        };
        match self.dispatcher.dispatch(metadata, jpeg, &self.in_flight) {
            Route::Detector => stats.to_detector += 1,
            Route::Tracker => stats.to_tracker += 1,
        }
    }
}

fn supervise(
    source_id: SourceId,
    reader: JoinHandle<ReaderExit>,
    sender: JoinHandle<SenderExit>,
    in_flight: Arc<InFlight>,
    grace: Duration,
) -> IngestReport {
    let reader = reader.join();
    // The reader's end of the queue is dropped by now; nothing more arrives.
    let sender = match sender.join() {
        Ok(SenderExit { queue, mut stats }) => {
            stats.released += queue.drain() as u64;
            stats
        }
        Err(_) => {
            error!(source = %source_id, "sender thread panicked");
            SenderStats::default()
        }
    };

    let (reader_stats, reason) = match reader {
        Ok(mut exit) => {
            exit.source.close();
            (exit.stats, exit.reason)
        }
        Err(_) => {
            error!(source = %source_id, "reader thread panicked");
            (ReaderStats::default(), StopReason::Crashed)
        }
    };

    let sends_settled = in_flight.wait_idle(grace);
    if !sends_settled {
        warn!(source = %source_id, pending = in_flight.count(), "in-flight sends did not finish within grace period");
    }

    let report = IngestReport {
        source_id,
        reason,
        frames_read: reader_stats.frames_read,
        empty_reads: reader_stats.empty_reads,
        skipped: reader_stats.queue_skips + sender.encode_failures,
        to_detector: sender.to_detector,
        to_tracker: sender.to_tracker,
        released: sender.released,
        backlog: reader_stats.backlog,
        sends_settled,
    };
    info!(
        source = %report.source_id,
        reason = ?report.reason,
        read = report.frames_read,
        skipped = report.skipped,
        released = report.released,
        "ingestion stopped"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_is_idempotent() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        assert!(!signal.wait_timeout(Duration::from_millis(5)));

        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.is_triggered());
        assert!(signal.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn test_signal_wakes_sleeper() {
        let signal = ShutdownSignal::new();
        let sleeper = {
            let signal = signal.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let fired = signal.wait_timeout(Duration::from_secs(10));
                (fired, started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        signal.trigger();
        let (fired, waited) = sleeper.join().unwrap();
        assert!(fired);
        assert!(waited < Duration::from_secs(5));
    }

    #[test]
    fn test_short_name_keeps_tail() {
        assert_eq!(short_name("rtsp://10.0.0.5:9000/stream"), ":9000/stream");
        assert_eq!(short_name("cam"), "cam");
    }
}
