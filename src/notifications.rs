use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    CategoryUpdated { user_id: i64, categories: Vec<i64> },
    #[serde(rename_all = "camelCase")]
    ProgressUpdated { user_id: i64, lesson_ids: Vec<i64> },
}

impl ProgressEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::CategoryUpdated { .. } => "categoryUpdated",
            ProgressEvent::ProgressUpdated { .. } => "progressUpdated",
        }
    }

    pub fn user_id(&self) -> i64 {
        match self {
            ProgressEvent::CategoryUpdated { user_id, .. } | ProgressEvent::ProgressUpdated { user_id, .. } => *user_id,
        }
    }
}

/// Best-effort fan-out of progress events. Publishing never fails, even with no listeners.
#[derive(Debug, Clone)]
pub struct ProgressNotifier {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: ProgressEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => debug!(event = name, receivers, "Progress event published"),
            Err(_) => debug!(event = name, "Progress event dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new()
    }
}
