//! Metric samples and the sinks that receive them.
//!
//! Components never touch global collector state: each one is handed an
//! `Arc<dyn MetricsSink>` at construction time.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;

use crate::config::ConfigError;

/// Outcome counters for frames flowing through an ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FrameOutcome {
    /// Successfully handed to a remote service.
    Processed,
    /// Dropped on a full queue, failed to encode or failed to send.
    Skipped,
    /// A read from the frame source that produced nothing.
    Empty,
    /// Every frame read from the source.
    All,
}

impl FrameOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameOutcome::Processed => "processed",
            FrameOutcome::Skipped => "skipped",
            FrameOutcome::Empty => "empty",
            FrameOutcome::All => "all",
        }
    }
}

/// Histogram families, each labelled by service or stage name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Histogram {
    SentBytes,
    TransitMs,
    EndToEndMs,
    ProcessingMs,
}

impl Histogram {
    pub fn name(self) -> &'static str {
        match self {
            Histogram::SentBytes => "sent_data_bytes",
            Histogram::TransitMs => "transit_time_ms",
            Histogram::EndToEndMs => "e2e_time_ms",
            Histogram::ProcessingMs => "processing_time_ms",
        }
    }
}

/// A single named sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample<'a> {
    Observe {
        histogram: Histogram,
        label: &'a str,
        value: f64,
    },
    Frames {
        outcome: FrameOutcome,
        count: u64,
    },
}

/// Fire-and-forget receiver of metric samples.
pub trait MetricsSink: Send + Sync {
    fn record(&self, sample: Sample<'_>);

    fn sent_bytes(&self, service: &str, bytes: usize) {
        self.record(Sample::Observe {
            histogram: Histogram::SentBytes,
            label: service,
            value: bytes as f64,
        });
    }

    fn transit_ms(&self, service: &str, ms: f64) {
        self.record(Sample::Observe {
            histogram: Histogram::TransitMs,
            label: service,
            value: ms,
        });
    }

    fn e2e_ms(&self, service: &str, ms: f64) {
        self.record(Sample::Observe {
            histogram: Histogram::EndToEndMs,
            label: service,
            value: ms,
        });
    }

    fn processing_ms(&self, stage: &str, ms: f64) {
        self.record(Sample::Observe {
            histogram: Histogram::ProcessingMs,
            label: stage,
            value: ms,
        });
    }

    fn frame(&self, outcome: FrameOutcome) {
        self.record(Sample::Frames { outcome, count: 1 });
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record(&self, _sample: Sample<'_>) {}
}

/// Same boundaries as the Prometheus client defaults.
pub const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Parse a comma separated list of bucket upper bounds, e.g. `"1,5,10,50"`.
///
/// An empty string yields `None` so callers fall back to the defaults.
pub fn parse_buckets(raw: &str) -> Result<Option<Vec<f64>>, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let mut buckets = Vec::new();
    for part in raw.split(',') {
        let value: f64 = part.trim().parse().map_err(|_| ConfigError::Invalid {
            field: "buckets",
            reason: format!("{part:?} is not a number"),
        })?;
        buckets.push(value);
    }
    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ConfigError::Invalid {
            field: "buckets",
            reason: "bucket bounds must be strictly increasing".into(),
        });
    }
    Ok(Some(buckets))
}

/// Bucket layout per histogram family.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub sent_bytes: Vec<f64>,
    pub transit_ms: Vec<f64>,
    pub e2e_ms: Vec<f64>,
    pub processing_ms: Vec<f64>,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            sent_bytes: DEFAULT_BUCKETS.to_vec(),
            transit_ms: DEFAULT_BUCKETS.to_vec(),
            e2e_ms: DEFAULT_BUCKETS.to_vec(),
            processing_ms: DEFAULT_BUCKETS.to_vec(),
        }
    }
}

impl BucketConfig {
    /// Build from comma separated lists; an empty list keeps the defaults.
    /// `rtt` applies to both transit and end-to-end latency.
    pub fn from_lists(sent_bytes: &str, processing: &str, rtt: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(b) = parse_buckets(sent_bytes)? {
            config.sent_bytes = b;
        }
        if let Some(b) = parse_buckets(processing)? {
            config.processing_ms = b;
        }
        if let Some(b) = parse_buckets(rtt)? {
            config.transit_ms = b.clone();
            config.e2e_ms = b;
        }
        Ok(config)
    }

    fn for_histogram(&self, histogram: Histogram) -> &[f64] {
        match histogram {
            Histogram::SentBytes => &self.sent_bytes,
            Histogram::TransitMs => &self.transit_ms,
            Histogram::EndToEndMs => &self.e2e_ms,
            Histogram::ProcessingMs => &self.processing_ms,
        }
    }
}

/// Cumulative histogram state for one (family, label) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramData {
    pub bounds: Vec<f64>,
    /// `counts[i]` counts samples `<= bounds[i]`; the final slot is `+Inf`.
    pub counts: Vec<u64>,
    pub count: u64,
    pub sum: f64,
}

impl HistogramData {
    fn new(bounds: &[f64]) -> Self {
        Self {
            bounds: bounds.to_vec(),
            counts: vec![0; bounds.len() + 1],
            count: 0,
            sum: 0.0,
        }
    }

    fn observe(&mut self, value: f64) {
        let slot = self
            .bounds
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(self.bounds.len());
        for c in &mut self.counts[slot..] {
            *c += 1;
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Point-in-time copy of everything a [`Registry`] has recorded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub histograms: BTreeMap<(Histogram, String), HistogramData>,
    pub frames: BTreeMap<FrameOutcome, u64>,
}

impl Snapshot {
    pub fn frames(&self, outcome: FrameOutcome) -> u64 {
        self.frames.get(&outcome).copied().unwrap_or(0)
    }

    pub fn histogram(&self, histogram: Histogram, label: &str) -> Option<&HistogramData> {
        self.histograms.get(&(histogram, label.to_string()))
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frames: Vec<String> = self
            .frames
            .iter()
            .map(|(outcome, n)| format!("{}={}", outcome.as_str(), n))
            .collect();
        write!(f, "frames[{}]", frames.join(" "))?;
        for ((histogram, label), data) in &self.histograms {
            write!(
                f,
                " {}{{{}}}: n={} mean={:.2}",
                histogram.name(),
                label,
                data.count,
                data.mean()
            )?;
        }
        Ok(())
    }
}

/// In-process metric registry.
pub struct Registry {
    buckets: BucketConfig,
    inner: Mutex<Snapshot>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(BucketConfig::default())
    }
}

impl Registry {
    pub fn new(buckets: BucketConfig) -> Self {
        Self {
            buckets,
            inner: Mutex::new(Snapshot::default()),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().clone()
    }
}

impl MetricsSink for Registry {
    fn record(&self, sample: Sample<'_>) {
        let mut inner = self.inner.lock();
        match sample {
            Sample::Observe {
                histogram,
                label,
                value,
            } => {
                let bounds = self.buckets.for_histogram(histogram);
                inner
                    .histograms
                    .entry((histogram, label.to_string()))
                    .or_insert_with(|| HistogramData::new(bounds))
                    .observe(value);
            }
            Sample::Frames { outcome, count } => {
                *inner.frames.entry(outcome).or_insert(0) += count;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_buckets() {
        assert_eq!(parse_buckets("").unwrap(), None);
        assert_eq!(
            parse_buckets("1, 5,10").unwrap(),
            Some(vec![1.0, 5.0, 10.0])
        );
        assert!(parse_buckets("1,x").is_err());
        assert!(parse_buckets("5,1").is_err());
    }

    #[test]
    fn test_histogram_cumulative_counts() {
        let registry = Registry::new(BucketConfig {
            transit_ms: vec![1.0, 10.0],
            ..Default::default()
        });
        registry.transit_ms("tracker", 0.5);
        registry.transit_ms("tracker", 5.0);
        registry.transit_ms("tracker", 50.0);

        let snap = registry.snapshot();
        let data = snap.histogram(Histogram::TransitMs, "tracker").unwrap();
        assert_eq!(data.counts, vec![1, 2, 3]);
        assert_eq!(data.count, 3);
        assert!((data.sum - 55.5).abs() < 1e-9);
    }

    #[test]
    fn test_bucket_lists() {
        let config = BucketConfig::from_lists("100,1000", "", "1,2").unwrap();
        assert_eq!(config.sent_bytes, vec![100.0, 1000.0]);
        assert_eq!(config.processing_ms, DEFAULT_BUCKETS.to_vec());
        assert_eq!(config.transit_ms, vec![1.0, 2.0]);
        assert_eq!(config.e2e_ms, vec![1.0, 2.0]);
        assert!(BucketConfig::from_lists("", "oops", "").is_err());
    }

    #[test]
    fn test_frame_counters() {
        let registry = Registry::default();
        registry.frame(FrameOutcome::All);
        registry.frame(FrameOutcome::All);
        registry.frame(FrameOutcome::Skipped);

        let snap = registry.snapshot();
        assert_eq!(snap.frames(FrameOutcome::All), 2);
        assert_eq!(snap.frames(FrameOutcome::Skipped), 1);
        assert_eq!(snap.frames(FrameOutcome::Processed), 0);
    }
}
