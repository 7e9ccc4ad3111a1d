//! Subscription types shared by the registry and the listener.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::types::{Notification, DEFAULT_RESPONSE_TIMEOUT_MS};

/// Configuration for a change listener.
#[derive(Clone, Debug)]
pub struct ListenerConfig {
    /// Max time one notification may wait on one subscriber before the
    /// subscriber is evicted.
    /// Default: 2s
    pub response_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
        }
    }
}

/// Index key of a subscription: `(group, keyWithLabel)`.
///
/// An empty `key_with_label` makes this a group-level topic, which
/// matches every key of the group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey {
    pub group: String,
    pub key_with_label: String,
}

impl TopicKey {
    pub fn new(group: impl Into<String>, key_with_label: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            key_with_label: key_with_label.into(),
        }
    }

    /// Topic matching every key of `group`.
    pub fn group_level(group: impl Into<String>) -> Self {
        Self::new(group, "")
    }
}

/// Result of one bounded delivery attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The subscriber did not accept within the response timeout.
    TimedOut,
    /// The receiving side is gone, or the subscription was removed.
    Closed,
}

/// One registration of a delivery channel under a topic.
///
/// Identity is the allocation: two subscriptions for the same topic and
/// channel are still distinct, and removal needs the `Arc` that
/// registration returned.
#[derive(Debug)]
pub struct Subscription {
    topic: TopicKey,
    /// Taken when the engine closes the channel.
    sender: Mutex<Option<Sender<Notification>>>,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(topic: TopicKey, sender: Sender<Notification>) -> Self {
        Self {
            topic,
            sender: Mutex::new(Some(sender)),
            active: AtomicBool::new(true),
        }
    }

    /// Topic this subscription is registered under.
    pub fn topic(&self) -> &TopicKey {
        &self.topic
    }

    /// Group of the topic.
    pub fn group(&self) -> &str {
        &self.topic.group
    }

    /// False once removed from the registry. Removal is terminal.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Drop the engine's sender so the receiver observes disconnection.
    pub(crate) fn close(&self) {
        self.deactivate();
        self.sender.lock().take();
    }

    /// Whether this subscription delivers into the same channel as `other`.
    pub fn delivers_to(&self, other: &Sender<Notification>) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_some_and(|s| s.same_channel(other))
    }

    pub(crate) fn sender(&self) -> Option<Sender<Notification>> {
        self.sender.lock().clone()
    }

    /// Send with a bounded wait. Never blocks longer than `timeout`.
    pub(crate) fn send_timeout(
        &self,
        notification: Notification,
        timeout: Duration,
    ) -> DeliveryOutcome {
        if !self.is_active() {
            return DeliveryOutcome::Closed;
        }
        // Clone out so the lock is not held across the wait.
        let Some(sender) = self.sender() else {
            return DeliveryOutcome::Closed;
        };
        match sender.send_timeout(notification, timeout) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(crossbeam_channel::SendTimeoutError::Timeout(_)) => DeliveryOutcome::TimedOut,
            Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => DeliveryOutcome::Closed,
        }
    }
}
