//! Routing of encoded frames to the detector or the tracker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::config::IngestConfig;
use crate::connection::ConnectionHandle;
use crate::error::Result;
use crate::frame::FrameMetadata;
use crate::metrics::{FrameOutcome, MetricsSink};
use crate::rpc::{CallOutcome, RpcClient, observe_call};

pub const DETECTOR_SERVICE: &str = "detector";
pub const TRACKER_SERVICE: &str = "tracker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Detector,
    Tracker,
}

impl Route {
    pub fn service(self) -> &'static str {
        match self {
            Route::Detector => DETECTOR_SERVICE,
            Route::Tracker => TRACKER_SERVICE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingPolicy {
    pub detection_frequency: u64,
    pub first_frame_to_detector: bool,
}

impl RoutingPolicy {
    pub fn new(detection_frequency: u64, first_frame_to_detector: bool) -> Self {
        Self {
            detection_frequency: detection_frequency.max(1),
            first_frame_to_detector,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.detection_frequency, config.first_frame_to_detector)
    }

    pub fn route(&self, frame_id: u64) -> Route {
        if (self.first_frame_to_detector && frame_id == 1) || frame_id % self.detection_frequency == 0 {
            Route::Detector
        } else {
            Route::Tracker
        }
    }
}

/// Anything that can take a raw frame submission.
pub trait FrameClient: Send + Sync + 'static {
    fn submit_frame(&self, metadata: &FrameMetadata, frame: Vec<u8>) -> impl Future<Output = Result<CallOutcome>> + Send;
}

impl FrameClient for RpcClient {
    fn submit_frame(&self, metadata: &FrameMetadata, frame: Vec<u8>) -> impl Future<Output = Result<CallOutcome>> + Send {
        RpcClient::submit_frame(self, metadata, frame)
    }
}

/// Counts sends that have been started but not finished.
#[derive(Debug, Default)]
pub struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

/// Decrements the owning [`InFlight`] when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    owner: Arc<InFlight>,
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        *self.count.lock() += 1;
        InFlightGuard { owner: self.clone() }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Block until nothing is in flight or `timeout` passes. Returns whether
    /// everything finished.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return true;
        }
        let result = self.idle.wait_while_for(&mut count, |c| *c > 0, timeout);
        !result.timed_out() || *count == 0
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.owner.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.owner.idle.notify_all();
        }
    }
}

/// Sends encoded frames to the service the routing policy picks, without
/// blocking the caller.
pub struct Dispatcher<C = RpcClient> {
    detector: Arc<ConnectionHandle<C>>,
    tracker: Arc<ConnectionHandle<C>>,
    policy: RoutingPolicy,
    runtime: Handle,
    metrics: Arc<dyn MetricsSink>,
}

impl<C> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            detector: self.detector.clone(),
            tracker: self.tracker.clone(),
            policy: self.policy,
            runtime: self.runtime.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<C: FrameClient> Dispatcher<C> {
    pub fn new(
        detector: Arc<ConnectionHandle<C>>,
        tracker: Arc<ConnectionHandle<C>>,
        policy: RoutingPolicy,
        runtime: Handle,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            detector,
            tracker,
            policy,
            runtime,
            metrics,
        }
    }

    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }

    /// Same connections and runtime, different routing.
    pub fn with_policy(&self, policy: RoutingPolicy) -> Self {
        Self {
            policy,
            ..self.clone()
        }
    }

    /// Start an asynchronous send of `frame` and return where it went.
    /// The send holds an `in_flight` guard until it completes.
    pub fn dispatch(&self, metadata: FrameMetadata, frame: Vec<u8>, in_flight: &Arc<InFlight>) -> Route {
        let route = self.policy.route(metadata.frame_id);
        let handle = match route {
            Route::Detector => self.detector.clone(),
            Route::Tracker => self.tracker.clone(),
        };
        let metrics = self.metrics.clone();
        let guard = in_flight.enter();
        self.runtime.spawn(async move {
            send(&handle, route, &metadata, frame, metrics.as_ref()).await;
            drop(guard);
        });
        route
    }
}

async fn send<C: FrameClient>(
    handle: &ConnectionHandle<C>,
    route: Route,
    metadata: &FrameMetadata,
    frame: Vec<u8>,
    metrics: &dyn MetricsSink,
) {
    let service = route.service();
    let Some(client) = handle.load() else {
        warn!(service, source = %metadata.source_id, frame = metadata.frame_id, "client not initialized, frame dropped");
        metrics.frame(FrameOutcome::Skipped);
        return;
    };
    match client.submit_frame(metadata, frame).await {
        Ok(outcome) => {
            metrics.frame(FrameOutcome::Processed);
            let rt = observe_call(metrics, service, &outcome);
            debug!(
                service,
                source = %metadata.source_id,
                frame = metadata.frame_id,
                transit_ms = rt.map(|rt| rt.transit_ms),
                "frame sent"
            );
        }
        Err(e) => {
            warn!(service, source = %metadata.source_id, frame = metadata.frame_id, "send failed: {e}");
            metrics.frame(FrameOutcome::Skipped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_default_policy() {
        let policy = RoutingPolicy::new(20, true);
        assert_eq!(policy.route(1), Route::Detector);
        assert_eq!(policy.route(2), Route::Tracker);
        assert_eq!(policy.route(19), Route::Tracker);
        assert_eq!(policy.route(20), Route::Detector);
        assert_eq!(policy.route(40), Route::Detector);
    }

    #[test]
    fn test_routing_without_first_frame_rule() {
        let policy = RoutingPolicy::new(3, false);
        let routes: Vec<Route> = (1..=6).map(|id| policy.route(id)).collect();
        assert_eq!(
            routes,
            vec![
                Route::Tracker,
                Route::Tracker,
                Route::Detector,
                Route::Tracker,
                Route::Tracker,
                Route::Detector
            ]
        );
    }

    #[test]
    fn test_frequency_one_sends_everything_to_detector() {
        let policy = RoutingPolicy::new(1, false);
        assert!((1..50).all(|id| policy.route(id) == Route::Detector));
    }

    #[test]
    fn test_in_flight_wait() {
        let in_flight = InFlight::new();
        assert!(in_flight.wait_idle(Duration::from_millis(1)));

        let guard = in_flight.enter();
        assert_eq!(in_flight.count(), 1);
        assert!(!in_flight.wait_idle(Duration::from_millis(20)));

        let waiter = {
            let in_flight = in_flight.clone();
            std::thread::spawn(move || in_flight.wait_idle(Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(waiter.join().unwrap());
        assert_eq!(in_flight.count(), 0);
    }
}
