//! Topic index of active subscriptions.

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ConfigStoreError, Result};
use crate::types::Notification;

use super::types::{Subscription, TopicKey};

/// Maps each topic to the subscriptions registered under it.
///
/// One lock guards the whole map. Lookups take it shared, every mutation
/// takes it exclusive. Lists are never left empty: the last removal from a
/// topic drops the topic.
pub struct SubscriberRegistry {
    topics: RwLock<HashMap<TopicKey, Vec<Arc<Subscription>>>>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Register `sender` under `(group, key_with_label)`.
    ///
    /// Topics are created on first use. The group must be set: app-wide
    /// subscriptions are registered once per namespace.
    pub fn add_by_topic(
        &self,
        group: &str,
        key_with_label: &str,
        sender: Sender<Notification>,
    ) -> Result<Arc<Subscription>> {
        if group.is_empty() {
            return Err(ConfigStoreError::InvalidArgument(format!(
                "group is required to subscribe (key: {:?})",
                key_with_label
            )));
        }

        let topic = TopicKey::new(group, key_with_label);
        let subscription = Arc::new(Subscription::new(topic.clone(), sender));

        self.topics
            .write()
            .entry(topic)
            .or_default()
            .push(Arc::clone(&subscription));

        debug!(group, key = key_with_label, "subscription registered");
        Ok(subscription)
    }

    /// Snapshot of the subscriptions registered under exactly this topic.
    pub fn find_by_topic(&self, group: &str, key_with_label: &str) -> Vec<Arc<Subscription>> {
        let topic = TopicKey::new(group, key_with_label);
        self.topics
            .read()
            .get(&topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove one subscription. Unknown or already removed ones are ignored.
    pub fn remove(&self, subscription: &Arc<Subscription>) {
        subscription.deactivate();

        let mut topics = self.topics.write();
        let Some(list) = topics.get_mut(subscription.topic()) else {
            return;
        };
        list.retain(|s| !Arc::ptr_eq(s, subscription));
        if list.is_empty() {
            topics.remove(subscription.topic());
        }
    }

    /// Remove every subscription delivering into the channel of `sender`,
    /// whatever topic it is under. Returns what was removed.
    pub fn remove_channel(&self, sender: &Sender<Notification>) -> Vec<Arc<Subscription>> {
        let mut removed = Vec::new();
        let mut topics = self.topics.write();

        topics.retain(|_, list| {
            list.retain(|s| {
                if s.delivers_to(sender) {
                    s.deactivate();
                    removed.push(Arc::clone(s));
                    false
                } else {
                    true
                }
            });
            !list.is_empty()
        });

        removed
    }

    /// Discard every subscription at once.
    ///
    /// Channels are left open; closing them is up to their owner.
    pub fn reset(&self) {
        let old = std::mem::take(&mut *self.topics.write());
        for subscription in old.values().flatten() {
            subscription.deactivate();
        }
        debug!(topics = old.len(), "subscriptions reset");
    }

    /// Number of topics with at least one subscription.
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    /// Number of subscriptions across all topics.
    pub fn subscription_count(&self) -> usize {
        self.topics.read().values().map(Vec::len).sum()
    }

    /// Whether no topic has a subscription.
    pub fn is_empty(&self) -> bool {
        self.topics.read().is_empty()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}
