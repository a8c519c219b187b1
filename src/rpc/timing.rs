//! Round-trip timing derived from the timestamps carried by every ack.

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tracing::warn;

use super::client::CallOutcome;
use super::message::Ack;
use crate::metrics::MetricsSink;

#[derive(Debug, Error)]
pub enum TimingError {
    #[error("failed to parse {field} timestamp {value:?}: {source}")]
    Parse {
        field: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Latencies of one completed call, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundTrip {
    /// Time spent on the wire in both directions, excluding the time the
    /// receiver held the request.
    pub transit_ms: f64,
    /// From the caller's send to the reply being back.
    pub e2e_ms: f64,
}

pub fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, TimingError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|source| TimingError::Parse {
            field,
            value: value.to_string(),
            source,
        })
}

fn millis(delta: TimeDelta) -> f64 {
    match delta.num_nanoseconds() {
        Some(ns) => ns as f64 / 1e6,
        None => delta.num_milliseconds() as f64,
    }
}

/// Compute transit and end-to-end time for an ack observed at `completed_at`.
pub fn measure(ack: &Ack, completed_at: DateTime<Utc>) -> Result<RoundTrip, TimingError> {
    let sent = parse_timestamp("original_sent", &ack.original_sent_timestamp)?;
    let received = parse_timestamp("received", &ack.received_timestamp)?;
    let ack_sent = parse_timestamp("ack_sent", &ack.ack_sent_timestamp)?;

    let transit = (received - sent) + (completed_at - ack_sent);
    Ok(RoundTrip {
        transit_ms: millis(transit),
        e2e_ms: millis(completed_at - sent),
    })
}

/// Record sent bytes and latencies of a successful call under `service`.
///
/// A timestamp that does not parse is logged and the latency samples are
/// skipped.
pub fn observe_call(metrics: &dyn MetricsSink, service: &str, outcome: &CallOutcome) -> Option<RoundTrip> {
    metrics.sent_bytes(service, outcome.sent_bytes);
    match measure(&outcome.ack, outcome.completed_at) {
        Ok(rt) => {
            metrics.transit_ms(service, rt.transit_ms);
            metrics.e2e_ms(service, rt.e2e_ms);
            Some(rt)
        }
        Err(e) => {
            warn!(service, "timing skipped: {e}");
            None
        }
    }
}
