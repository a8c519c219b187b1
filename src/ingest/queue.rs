//! Bounded frame queue between the reader and the sender.
//!
//! Enqueue never blocks: a full queue drops the newest frame and counts it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

use crate::frame::Frame;

#[derive(Debug, Default)]
struct QueueStats {
    pushed: AtomicU64,
    skipped: AtomicU64,
}

/// Producer side. Dropping it tells the consumer no more frames will come.
#[derive(Debug)]
pub struct FrameSender {
    tx: Sender<Frame>,
    stats: Arc<QueueStats>,
}

/// Consumer side.
#[derive(Debug)]
pub struct FrameReceiver {
    rx: Receiver<Frame>,
    stats: Arc<QueueStats>,
}

/// Create a queue holding at most `capacity` frames.
pub fn frame_queue(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = bounded(capacity);
    let stats = Arc::new(QueueStats::default());
    (
        FrameSender {
            tx,
            stats: stats.clone(),
        },
        FrameReceiver { rx, stats },
    )
}

impl FrameSender {
    /// Try to enqueue. On a full (or abandoned) queue the frame is dropped
    /// and `false` returned.
    pub fn push(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.stats.pushed.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn skipped(&self) -> u64 {
        self.stats.skipped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }
}

impl FrameReceiver {
    /// Non-blocking pop. `Err(Disconnected)` once the sender is gone and the
    /// queue is empty.
    pub fn try_pop(&self) -> Result<Frame, TryRecvError> {
        self.rx.try_recv()
    }

    /// Blocking pop; `None` once the sender is gone and the queue is empty.
    pub fn pop(&self) -> Option<Frame> {
        self.rx.recv().ok()
    }

    /// The raw channel, for `select!` alongside other events.
    pub fn channel(&self) -> &Receiver<Frame> {
        &self.rx
    }

    /// Drop every queued frame without processing it.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn pushed(&self) -> u64 {
        self.stats.pushed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.stats.skipped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
