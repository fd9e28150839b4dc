// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscriber Fan-out (§4.6): bridges the event monitor's [`EventSink`]
//! calls to any number of attached IPC subscribers.

use bku_core::Job;
use bku_engine::{EventSink, NotificationLevel};
use bku_wire::{FanoutLevel, FanoutMessage};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Bounded so a slow or dead subscriber can't apply backpressure to the
/// event monitor; a full channel is treated the same as a dead one.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

struct Subscriber {
    tx: mpsc::Sender<FanoutMessage>,
}

/// Broadcasts to a snapshot of subscribers on every call, synchronously
/// (`try_send`, no backpressure wait). Dead or full subscribers are
/// dropped on the next broadcast. Messages for a given subscriber arrive
/// in enqueue order; no cross-job ordering is promised.
pub struct FanoutHub {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl FanoutHub {
    pub fn new() -> Self {
        Self { subscribers: Mutex::new(Vec::new()) }
    }

    /// Attach a new subscriber, returning the receiving half of its
    /// channel. Dropping the receiver detaches it (the next broadcast's
    /// failed `try_send` prunes the entry).
    pub fn subscribe(&self) -> mpsc::Receiver<FanoutMessage> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.subscribers.lock().push(Subscriber { tx });
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn broadcast(&self, message: FanoutMessage) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| sub.tx.try_send(message.clone()).is_ok());
    }
}

impl Default for FanoutHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for FanoutHub {
    fn job_update(&self, job: &Job) {
        self.broadcast(FanoutMessage::job_update(job));
    }

    fn job_final_update(&self, job: &Job) {
        self.broadcast(FanoutMessage::job_final_update(job));
    }

    fn notification(&self, level: NotificationLevel, message: &str, details: Option<&str>) {
        let level = match level {
            NotificationLevel::Info => FanoutLevel::Info,
            NotificationLevel::Warning => FanoutLevel::Warning,
            NotificationLevel::Error => FanoutLevel::Error,
            NotificationLevel::Success => FanoutLevel::Success,
        };
        self.broadcast(FanoutMessage::Notification {
            level,
            message: message.to_string(),
            details: details.map(str::to_string),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bku_core::{JobSettings, JobType};

    fn job() -> Job {
        Job::new("nightly".into(), "/a".into(), "/b".into(), JobType::LocalCopy, JobSettings::default(), 1)
    }

    #[tokio::test]
    async fn subscriber_receives_job_update() {
        let hub = FanoutHub::new();
        let mut rx = hub.subscribe();
        hub.job_update(&job());
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, FanoutMessage::JobUpdate(_)));
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned_on_next_broadcast() {
        let hub = FanoutHub::new();
        {
            let _rx = hub.subscribe();
        }
        assert_eq!(hub.subscriber_count(), 1, "not pruned until a send is attempted");
        hub.job_update(&job());
        assert_eq!(hub.subscriber_count(), 0, "dead receiver pruned after a failed try_send");
    }

    #[tokio::test]
    async fn two_subscribers_both_receive_the_same_notification() {
        let hub = FanoutHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        hub.notification(NotificationLevel::Warning, "degraded", None);
        assert!(matches!(a.recv().await.unwrap(), FanoutMessage::Notification { .. }));
        assert!(matches!(b.recv().await.unwrap(), FanoutMessage::Notification { .. }));
    }
}
