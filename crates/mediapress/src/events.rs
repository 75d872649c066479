use log::{debug, info};
use serde::Serialize;
use tokio::sync::broadcast;
use crate::activity::ActivityEntry;
use crate::metrics::MetricsRecord;

/// Notifications for connected clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PressEvent {
    /// The set of downloadable files changed
    FilesUpdated { names: Vec<String> },
    StatsMetricsUpdated { metrics: MetricsRecord },
    Activity { entry: ActivityEntry },
}

impl PressEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PressEvent::FilesUpdated { .. } => "files_updated",
            PressEvent::StatsMetricsUpdated { .. } => "stats_metrics_updated",
            PressEvent::Activity { .. } => "activity",
        }
    }
}

/// Fire-and-forget event delivery. Emitting never blocks and never fails the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PressEvent);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: PressEvent) {}
}

/// Writes events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: PressEvent) {
        match &event {
            PressEvent::FilesUpdated { names } => info!("Event files_updated: {:?}", names),
            PressEvent::StatsMetricsUpdated { metrics } => info!(
                "Event stats_metrics_updated: {} files, {} bytes lifetime",
                metrics.lifetime_files, metrics.lifetime_bytes
            ),
            PressEvent::Activity { entry } => info!("Event activity: [{}] {}", entry.kind, entry.message),
        }
    }
}

/// Fans events out to any number of subscribers.
///
/// Slow subscribers lose the oldest events; with no subscribers events are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<PressEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PressEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: PressEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            debug!("No subscribers for {}", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_delivers_in_order() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();

        sink.emit(PressEvent::FilesUpdated { names: vec!["a.jpg".to_string()] });
        sink.emit(PressEvent::StatsMetricsUpdated { metrics: MetricsRecord::default() });

        assert_eq!(rx.recv().await.unwrap().name(), "files_updated");
        assert_eq!(rx.recv().await.unwrap().name(), "stats_metrics_updated");
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let sink = BroadcastSink::new(1);
        sink.emit(PressEvent::FilesUpdated { names: Vec::new() });
        NoopSink.emit(PressEvent::FilesUpdated { names: Vec::new() });
        LogSink.emit(PressEvent::FilesUpdated { names: Vec::new() });
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(PressEvent::FilesUpdated { names: vec!["x".to_string()] }).unwrap();
        assert_eq!(json["event"], "files_updated");
        assert_eq!(json["names"][0], "x");
    }
}
