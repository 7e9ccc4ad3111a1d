//! In-memory configuration store.
//!
//! Holds items in process memory and notifies subscribers synchronously
//! from `set` and `delete`. Useful for local runs and tests.

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ConfigStoreError, Result};
use crate::health::ComponentIndicators;
use crate::keys::KeyCodec;
use crate::store::{expand_subscription, parse_namespaces, register_topics, ConfigStore};
use crate::subscriptions::{ChangeListener, ListenerStore, TopicKey};
use crate::types::{
    ChangeEvent, ConfigChange, ConfigurationItem, DeleteRequest, GetRequest, Notification,
    SetRequest, StoreConfig, SubscribeRequest,
};

const DEFAULT_GROUP: &str = "default";
const DEFAULT_LABEL: &str = "";

#[derive(Clone, Debug)]
struct Entry {
    content: String,
    tags: HashMap<String, String>,
}

/// Shared between the store and its listener.
struct MemoryBackend {
    codec: KeyCodec,
    app_id: String,
    store_name: String,
    /// Keyed by `(group, keyWithLabel)`.
    entries: RwLock<BTreeMap<TopicKey, Entry>>,
}

impl MemoryBackend {
    fn item(&self, topic: &TopicKey, entry: &Entry) -> ConfigurationItem {
        let (key, label) = self.codec.split_key(&topic.key_with_label);
        ConfigurationItem {
            group: topic.group.clone(),
            key,
            label,
            content: entry.content.clone(),
            tags: entry.tags.clone(),
            ..Default::default()
        }
    }

    fn items_in_group(&self, group: &str) -> Vec<ConfigurationItem> {
        self.entries
            .read()
            .iter()
            .filter(|(topic, _)| topic.group == group)
            .map(|(topic, entry)| self.item(topic, entry))
            .collect()
    }
}

impl ListenerStore for MemoryBackend {
    fn split_key(&self, key_with_label: &str) -> (String, String) {
        self.codec.split_key(key_with_label)
    }

    fn get_all_tags(&self, group: &str, key_with_label: &str) -> Result<HashMap<String, String>> {
        Ok(self
            .entries
            .read()
            .get(&TopicKey::new(group, key_with_label))
            .map(|e| e.tags.clone())
            .unwrap_or_default())
    }

    fn app_id(&self) -> String {
        self.app_id.clone()
    }

    fn store_name(&self) -> String {
        self.store_name.clone()
    }
}

/// Configuration store kept entirely in memory.
pub struct InMemoryConfigStore {
    backend: Arc<MemoryBackend>,
    listener: ChangeListener,
    namespaces: Vec<String>,
    indicators: ComponentIndicators,
}

impl InMemoryConfigStore {
    pub fn open(config: &StoreConfig, indicators: ComponentIndicators) -> Result<Self> {
        let namespaces = config
            .meta("namespace_name")
            .map(parse_namespaces)
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_GROUP.to_string()]);

        let backend = Arc::new(MemoryBackend {
            codec: KeyCodec::default(),
            app_id: config.app_id.clone(),
            store_name: config.store_name.clone(),
            entries: RwLock::new(BTreeMap::new()),
        });
        let listener = ChangeListener::with_config(backend.clone(), config.listener_config());

        indicators.set_started();
        Ok(Self {
            backend,
            listener,
            namespaces,
            indicators,
        })
    }

    pub fn listener(&self) -> &ChangeListener {
        &self.listener
    }

    pub fn indicators(&self) -> &ComponentIndicators {
        &self.indicators
    }

    fn group_or_default<'a>(&self, group: &'a str) -> &'a str {
        if group.is_empty() {
            DEFAULT_GROUP
        } else {
            group
        }
    }

    /// Emit one event per group, keeping write order within each.
    fn dispatch(&self, changes: Vec<(TopicKey, ConfigChange)>) {
        let mut events: Vec<ChangeEvent> = Vec::new();
        for (topic, change) in changes {
            match events.iter_mut().find(|e| e.namespace == topic.group) {
                Some(event) => event.changes.push((topic.key_with_label, change)),
                None => events.push(ChangeEvent::new(topic.group).with_change(topic.key_with_label, change)),
            }
        }
        for event in &events {
            self.listener.on_change(event);
        }
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn get(&self, req: &GetRequest) -> Result<Vec<ConfigurationItem>> {
        let group = if req.group.is_empty() && !req.keys.is_empty() {
            DEFAULT_GROUP
        } else {
            req.group.as_str()
        };

        if group.is_empty() {
            return Ok(self
                .namespaces
                .iter()
                .flat_map(|ns| self.backend.items_in_group(ns))
                .collect());
        }

        if req.keys.is_empty() {
            return Ok(self.backend.items_in_group(group));
        }

        let entries = self.backend.entries.read();
        Ok(req
            .keys
            .iter()
            .filter_map(|key| {
                let topic = TopicKey::new(group, self.backend.codec.concatenate_key(key, &req.label));
                entries.get(&topic).map(|entry| self.backend.item(&topic, entry))
            })
            .collect())
    }

    fn set(&self, req: &SetRequest) -> Result<()> {
        if req.items.is_empty() {
            return Err(ConfigStoreError::missing("items"));
        }

        let changes: Vec<(TopicKey, ConfigChange)> = {
            let mut entries = self.backend.entries.write();
            req.items
                .iter()
                .map(|item| {
                    let topic = TopicKey::new(
                        self.group_or_default(&item.group),
                        self.backend.codec.concatenate_key(&item.key, &item.label),
                    );
                    let old = entries.insert(
                        topic.clone(),
                        Entry {
                            content: item.content.clone(),
                            tags: item.tags.clone(),
                        },
                    );
                    let change = ConfigChange::put(old.map(|e| e.content), item.content.clone());
                    (topic, change)
                })
                .collect()
        };

        debug!(store = %self.backend.store_name, items = changes.len(), "set");
        self.dispatch(changes);
        Ok(())
    }

    fn delete(&self, req: &DeleteRequest) -> Result<()> {
        if req.keys.is_empty() {
            return Err(ConfigStoreError::missing("keys"));
        }
        let group = self.group_or_default(&req.group);

        let changes: Vec<(TopicKey, ConfigChange)> = {
            let mut entries = self.backend.entries.write();
            req.keys
                .iter()
                .filter_map(|key| {
                    let topic =
                        TopicKey::new(group, self.backend.codec.concatenate_key(key, &req.label));
                    entries
                        .remove(&topic)
                        .map(|old| (topic, ConfigChange::delete(Some(old.content))))
                })
                .collect()
        };

        debug!(store = %self.backend.store_name, items = changes.len(), "delete");
        self.dispatch(changes);
        Ok(())
    }

    fn subscribe(&self, req: &SubscribeRequest, sender: Sender<Notification>) -> Result<()> {
        let topics = expand_subscription(req, DEFAULT_GROUP, &self.namespaces, &self.backend.codec);
        register_topics(&self.listener, &topics, &sender)
    }

    fn stop_subscribe(&self) {
        self.listener.reset();
    }

    fn default_group(&self) -> &str {
        DEFAULT_GROUP
    }

    fn default_label(&self) -> &str {
        DEFAULT_LABEL
    }

    fn store_name(&self) -> &str {
        &self.backend.store_name
    }

    fn app_id(&self) -> &str {
        &self.backend.app_id
    }
}
