//! Change listener: turns backend change events into subscriber notifications.

use crossbeam_channel::Sender;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::types::{ChangeEvent, ConfigChange, ConfigurationItem, Notification};

use super::registry::SubscriberRegistry;
use super::types::{DeliveryOutcome, ListenerConfig, Subscription};

/// What the listener needs from the store that owns it.
///
/// The key delimiter and the tag namespace are store conventions, so the
/// store answers these rather than the engine.
pub trait ListenerStore: Send + Sync {
    /// Split a key as reported in change events into `(key, label)`.
    fn split_key(&self, key_with_label: &str) -> (String, String);

    /// Tags attached to an item. Failures are logged by the caller and the
    /// notification goes out without tags.
    fn get_all_tags(&self, group: &str, key_with_label: &str) -> Result<HashMap<String, String>>;

    fn app_id(&self) -> String;

    fn store_name(&self) -> String;
}

/// Dispatches change events to subscribers, evicting the ones that do not
/// keep up.
///
/// A subscriber that has not accepted a notification within the response
/// timeout is removed and its channel closed. It gets no further
/// notifications and has to subscribe again. This keeps a stuck consumer
/// from stalling the backend's event thread, which serves every
/// subscriber of the store.
pub struct ChangeListener {
    subscribers: SubscriberRegistry,
    timeout: Duration,
    store: Arc<dyn ListenerStore>,
}

impl ChangeListener {
    /// Create a listener with the default response timeout.
    pub fn new(store: Arc<dyn ListenerStore>) -> Self {
        Self::with_config(store, ListenerConfig::default())
    }

    /// Create a listener with custom configuration.
    pub fn with_config(store: Arc<dyn ListenerStore>, config: ListenerConfig) -> Self {
        Self {
            subscribers: SubscriberRegistry::new(),
            timeout: config.response_timeout,
            store,
        }
    }

    /// How long one delivery may block before the subscriber is evicted.
    pub fn response_timeout(&self) -> Duration {
        self.timeout
    }

    /// The topic index this listener dispatches from.
    pub fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }

    /// Register `sender` under a topic. See [`SubscriberRegistry::add_by_topic`].
    pub fn add_by_topic(
        &self,
        group: &str,
        key_with_label: &str,
        sender: Sender<Notification>,
    ) -> Result<Arc<Subscription>> {
        self.subscribers.add_by_topic(group, key_with_label, sender)
    }

    /// Drop every subscription. In-flight dispatch skips them from here on.
    pub fn reset(&self) {
        self.subscribers.reset();
    }

    /// Entry point for backend adapters, called once per change event.
    ///
    /// Blocks for at most the response timeout per subscriber and key.
    /// Delivery failures are handled here and never reach the caller.
    pub fn on_change(&self, event: &ChangeEvent) {
        if event.is_empty() {
            return;
        }
        let namespace = event.namespace.as_str();
        let group_level = self.subscribers.find_by_topic(namespace, "");

        for (key_with_label, change) in &event.changes {
            let key_level = self.subscribers.find_by_topic(namespace, key_with_label);
            debug!(
                group = namespace,
                key = key_with_label.as_str(),
                kind = %change.kind,
                subscribers = group_level.len() + key_level.len(),
                "dispatching change"
            );

            for subscription in group_level.iter().chain(key_level.iter()) {
                self.notify(subscription, key_with_label, change);
            }
        }
    }

    /// Deliver one change to one subscriber and evict it on failure.
    pub(crate) fn notify(
        &self,
        subscription: &Arc<Subscription>,
        key_with_label: &str,
        change: &ConfigChange,
    ) -> DeliveryOutcome {
        if !subscription.is_active() {
            return DeliveryOutcome::Closed;
        }

        let notification = self.build_notification(subscription.group(), key_with_label, change);
        let outcome = subscription.send_timeout(notification, self.timeout);

        match outcome {
            DeliveryOutcome::Delivered => {}
            DeliveryOutcome::TimedOut => {
                warn!(
                    group = subscription.group(),
                    key = key_with_label,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "subscriber did not accept notification in time, closing its channel"
                );
                self.evict(subscription);
            }
            DeliveryOutcome::Closed => {
                if subscription.is_active() {
                    warn!(
                        group = subscription.group(),
                        key = key_with_label,
                        "subscriber channel closed, removing subscription"
                    );
                }
                self.subscribers.remove(subscription);
            }
        }

        outcome
    }

    fn build_notification(
        &self,
        group: &str,
        key_with_label: &str,
        change: &ConfigChange,
    ) -> Notification {
        let (key, label) = self.store.split_key(key_with_label);
        let mut item = ConfigurationItem {
            group: group.to_string(),
            key,
            label,
            ..Default::default()
        };

        // Deletes go out with empty content and no tags.
        if !change.is_delete() {
            item.content = change.new_value.clone().unwrap_or_default();
            match self.store.get_all_tags(group, key_with_label) {
                Ok(tags) => item.tags = tags,
                Err(e) => error!(
                    group,
                    key = key_with_label,
                    error = %e,
                    "failed to query tags for changed item"
                ),
            }
        }

        Notification {
            store_name: self.store.store_name(),
            app_id: self.store.app_id(),
            items: vec![item],
        }
    }

    /// Remove the subscription and close its channel. Every other
    /// subscription sharing that channel goes with it.
    fn evict(&self, subscription: &Arc<Subscription>) {
        self.subscribers.remove(subscription);
        if let Some(sender) = subscription.sender() {
            for other in self.subscribers.remove_channel(&sender) {
                other.close();
            }
        }
        subscription.close();
    }
}
