use std::sync::Mutex;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadStatus {
    Ok,
    Error,
}

/// Published once per completed reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadEvent {
    pub root_label: String,
    pub status: ReloadStatus,
    pub source_file_count: usize,
    pub project_count: usize,
    /// Codes of every error-severity diagnostic, in report order.
    pub error_codes: Vec<String>,
    pub elapsed: Duration,
}

impl ReloadEvent {
    pub fn is_ok(&self) -> bool {
        self.status == ReloadStatus::Ok
    }
}

/// Fan-out of reload events.
///
/// Each subscriber has a bounded queue; a subscriber that does not keep up misses events, and
/// dropped receivers are forgotten on the next publish.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    senders: Mutex<Vec<Sender<ReloadEvent>>>,
}

impl Subscribers {
    pub(crate) fn subscribe(&self) -> Receiver<ReloadEvent> {
        let (tx, rx) = async_channel::bounded(SUBSCRIBER_QUEUE_CAPACITY);
        self.senders
            .lock()
            .expect("workspace subscriber mutex poisoned")
            .push(tx);
        rx
    }

    pub(crate) fn publish(&self, event: &ReloadEvent) {
        let mut senders = self
            .senders
            .lock()
            .expect("workspace subscriber mutex poisoned");
        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(async_channel::TrySendError::Full(_)) => true,
            Err(async_channel::TrySendError::Closed(_)) => false,
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.senders
            .lock()
            .expect("workspace subscriber mutex poisoned")
            .len()
    }
}
