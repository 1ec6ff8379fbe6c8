use dashmap::DashMap;
use gpctl_common::{GpError, ProgressEvent, TickKind};
use gpctl_proto::{error_to_status, HubReply};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::Sender;
use tonic::Status;
use tracing::{debug, warn};

/// Events buffered per MakeCluster call before the workflow waits on the client
pub const STREAM_BUFFER: usize = 64;

/// Destination of the events produced while a workflow runs
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: ProgressEvent);
}

/// Item type of a server-streaming hub response
pub type ReplyResult = std::result::Result<HubReply, Status>;

/// Feeds events into the response stream of a gRPC call.
///
/// The channel is bounded, so a slow client holds the workflow back
/// instead of letting events pile up. Once the client has gone away further
/// events are dropped; the workflow itself keeps running.
pub struct ChannelSink {
    tx: Sender<ReplyResult>,
    closed: AtomicBool,
}

impl ChannelSink {
    pub fn new(tx: Sender<ReplyResult>) -> Self {
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// End the stream with the status for `err`
    pub async fn fail(&self, err: &GpError) {
        if !self.is_closed() {
            let _ = self.tx.send(Err(error_to_status(err))).await;
        }
    }

    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            warn!("Client disconnected, dropping further progress events");
        }
    }
}

#[async_trait::async_trait]
impl EventSink for ChannelSink {
    async fn send(&self, event: ProgressEvent) {
        if self.is_closed() {
            return;
        }
        if self.tx.send(Ok(HubReply::from(event))).await.is_err() {
            self.mark_closed();
        }
    }
}

/// Forwards events while keeping per-label progress counters
pub struct ProgressTracker<'a> {
    inner: &'a dyn EventSink,
    totals: DashMap<String, u64>,
    counts: DashMap<String, AtomicU64>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(inner: &'a dyn EventSink) -> Self {
        Self {
            inner,
            totals: DashMap::new(),
            counts: DashMap::new(),
        }
    }

    pub fn count(&self, label: &str) -> u64 {
        self.counts
            .get(label)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn total(&self, label: &str) -> Option<u64> {
        self.totals.get(label).map(|t| *t)
    }
}

#[async_trait::async_trait]
impl EventSink for ProgressTracker<'_> {
    async fn send(&self, event: ProgressEvent) {
        if let ProgressEvent::Progress(tick) = &event {
            match tick.kind {
                TickKind::Init { total } => {
                    self.totals.insert(tick.label.clone(), u64::from(total));
                    self.counts.insert(tick.label.clone(), AtomicU64::new(0));
                }
                TickKind::Increment => {
                    let done = self
                        .counts
                        .entry(tick.label.clone())
                        .or_default()
                        .fetch_add(1, Ordering::Relaxed)
                        + 1;
                    debug!(
                        "{}: {}/{}",
                        tick.label,
                        done,
                        self.total(&tick.label).unwrap_or(0)
                    );
                }
            }
        }

        self.inner.send(event).await;
    }
}
