//! etcd configuration store.
//!
//! Items live at `/{appId}/{group}/{label}/{key}` and each tag at
//! `/{appId}/{group}/{label}/{key}/{tag}`. The watch stream on `/{appId}`
//! is driven outside this module; every response batch is passed to
//! [`EtcdConfigStore::process_watch_response`].

use crossbeam_channel::Sender;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::error::{ConfigStoreError, Result};
use crate::health::ComponentIndicators;
use crate::keys::KeyCodec;
use crate::store::{expand_subscription, register_topics, ConfigStore};
use crate::subscriptions::{ChangeListener, ListenerStore};
use crate::types::{
    ChangeEvent, ConfigChange, ConfigurationItem, DeleteRequest, GetRequest, Notification,
    SetRequest, StoreConfig, SubscribeRequest,
};

pub const DEFAULT_GROUP: &str = "default";
pub const DEFAULT_LABEL: &str = "default";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEventKind {
    Put,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub kv: KeyValue,
}

/// One batch from the etcd watch stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchResponse {
    pub events: Vec<WatchEvent>,
}

/// The subset of the etcd KV API this store uses.
pub trait EtcdClient: Send + Sync {
    fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    fn put(&self, key: &str, value: &str) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    fn delete_prefix(&self, prefix: &str) -> Result<()>;
}

/// A parsed item or tag path.
#[derive(Debug, PartialEq, Eq)]
struct ItemPath<'a> {
    group: &'a str,
    label: &'a str,
    key: &'a str,
    tag: Option<&'a str>,
}

/// Parse `/{appId}/{group}/{label}/{key}[/{tag}]`. `None` for paths of
/// another app or with the wrong depth.
fn parse_path<'a>(app_id: &str, path: &'a str) -> Option<ItemPath<'a>> {
    let rest = path.strip_prefix('/')?.strip_prefix(app_id)?.strip_prefix('/')?;
    let parts: Vec<&str> = rest.split('/').collect();
    match parts[..] {
        [group, label, key] => Some(ItemPath {
            group,
            label,
            key,
            tag: None,
        }),
        [group, label, key, tag] => Some(ItemPath {
            group,
            label,
            key,
            tag: Some(tag),
        }),
        _ => None,
    }
}

fn item_path(app_id: &str, group: &str, label: &str, key: &str) -> String {
    format!("/{}/{}/{}/{}", app_id, group, label, key)
}

struct EtcdListenerStore {
    codec: KeyCodec,
    client: Arc<dyn EtcdClient>,
    app_id: String,
    store_name: String,
}

impl ListenerStore for EtcdListenerStore {
    fn split_key(&self, key_with_label: &str) -> (String, String) {
        self.codec.split_key(key_with_label)
    }

    fn get_all_tags(&self, group: &str, key_with_label: &str) -> Result<HashMap<String, String>> {
        let (key, label) = self.codec.split_key(key_with_label);
        let prefix = format!("{}/", item_path(&self.app_id, group, &label, &key));
        Ok(self
            .client
            .get_prefix(&prefix)?
            .into_iter()
            .filter_map(|kv| {
                let tag = kv.key.strip_prefix(&prefix)?;
                (!tag.is_empty() && !tag.contains('/')).then(|| (tag.to_string(), kv.value))
            })
            .collect())
    }

    fn app_id(&self) -> String {
        self.app_id.clone()
    }

    fn store_name(&self) -> String {
        self.store_name.clone()
    }
}

/// Configuration store backed by etcd.
pub struct EtcdConfigStore {
    accessor: Arc<EtcdListenerStore>,
    listener: ChangeListener,
    indicators: ComponentIndicators,
}

impl EtcdConfigStore {
    pub fn open(
        config: &StoreConfig,
        client: Arc<dyn EtcdClient>,
        indicators: ComponentIndicators,
    ) -> Result<Self> {
        let result = Self::build(config, client, indicators.clone());
        indicators.track(result)
    }

    fn build(
        config: &StoreConfig,
        client: Arc<dyn EtcdClient>,
        indicators: ComponentIndicators,
    ) -> Result<Self> {
        if config.app_id.is_empty() {
            return Err(ConfigStoreError::missing("app_id"));
        }
        if config.address.is_empty() {
            return Err(ConfigStoreError::missing("address"));
        }

        let accessor = Arc::new(EtcdListenerStore {
            codec: KeyCodec::default(),
            client,
            app_id: config.app_id.clone(),
            store_name: config.store_name.clone(),
        });
        Ok(Self {
            listener: ChangeListener::with_config(accessor.clone(), config.listener_config()),
            accessor,
            indicators,
        })
    }

    pub fn listener(&self) -> &ChangeListener {
        &self.listener
    }

    pub fn indicators(&self) -> &ComponentIndicators {
        &self.indicators
    }

    /// Prefix the watch stream has to cover.
    pub fn watch_prefix(&self) -> String {
        format!("/{}", self.accessor.app_id)
    }

    fn client(&self) -> &dyn EtcdClient {
        self.accessor.client.as_ref()
    }

    /// Feed one watch batch through the listener.
    ///
    /// Emits one event per group touched, in the order the groups first
    /// appear; tag writes and foreign keys are skipped.
    pub fn process_watch_response(&self, resp: &WatchResponse) {
        if resp.events.is_empty() {
            return;
        }

        let mut events: Vec<ChangeEvent> = Vec::new();
        for watched in &resp.events {
            let Some(path) = parse_path(&self.accessor.app_id, &watched.kv.key) else {
                trace!(key = %watched.kv.key, "ignoring key outside the app");
                continue;
            };
            if path.tag.is_some() {
                trace!(key = %watched.kv.key, "ignoring tag update");
                continue;
            }

            let key_with_label = self.accessor.codec.concatenate_key(path.key, path.label);
            let change = match watched.kind {
                WatchEventKind::Put => ConfigChange::put(None, watched.kv.value.clone()),
                WatchEventKind::Delete => ConfigChange::delete(None),
            };
            match events.iter_mut().find(|e| e.namespace == path.group) {
                Some(event) => event.changes.push((key_with_label, change)),
                None => events.push(ChangeEvent::new(path.group).with_change(key_with_label, change)),
            }
        }

        for event in &events {
            self.listener.on_change(event);
        }
    }

    /// Assemble items from raw key-values, folding tag keys into their item.
    /// Keys must match `(group, label, key)` where `None` is a wildcard.
    fn collect_items(
        &self,
        app_id: &str,
        kvs: &[KeyValue],
        group: Option<&str>,
        label: Option<&str>,
        key: Option<&str>,
    ) -> Vec<ConfigurationItem> {
        let matches = |want: Option<&str>, got: &str| want.map_or(true, |w| w == got);

        let mut items: Vec<ConfigurationItem> = Vec::new();
        let mut index: HashMap<(String, String, String), usize> = HashMap::new();
        for kv in kvs {
            let Some(path) = parse_path(app_id, &kv.key) else {
                continue;
            };
            if !(matches(group, path.group) && matches(label, path.label) && matches(key, path.key)) {
                continue;
            }

            let id = (path.group.to_string(), path.label.to_string(), path.key.to_string());
            let slot = *index.entry(id).or_insert_with(|| {
                items.push(ConfigurationItem::new(path.group, path.key, "").with_label(path.label));
                items.len() - 1
            });
            match path.tag {
                Some(tag) => {
                    items[slot].tags.insert(tag.to_string(), kv.value.clone());
                }
                None => items[slot].content = kv.value.clone(),
            }
        }
        items
    }
}

impl ConfigStore for EtcdConfigStore {
    fn get(&self, req: &GetRequest) -> Result<Vec<ConfigurationItem>> {
        let app_id = if req.app_id.is_empty() {
            self.accessor.app_id.as_str()
        } else {
            req.app_id.as_str()
        };
        let kvs = self
            .client()
            .get_prefix(&format!("/{}", app_id))
            .inspect_err(|e| error!(app_id, error = %e, "failed to get app key-values"))?;

        let label = (!req.label.is_empty()).then_some(req.label.as_str());
        if req.keys.is_empty() {
            let group = (!req.group.is_empty()).then_some(req.group.as_str());
            return Ok(self.collect_items(app_id, &kvs, group, label, None));
        }

        // Keys without a group live in the default group.
        let group = if req.group.is_empty() { DEFAULT_GROUP } else { req.group.as_str() };
        Ok(req
            .keys
            .iter()
            .flat_map(|key| self.collect_items(app_id, &kvs, Some(group), label, Some(key)))
            .collect())
    }

    fn set(&self, req: &SetRequest) -> Result<()> {
        if req.app_id.is_empty() {
            return Err(ConfigStoreError::missing("app_id"));
        }
        for item in &req.items {
            let group = if item.group.is_empty() { DEFAULT_GROUP } else { item.group.as_str() };
            let label = if item.label.is_empty() { DEFAULT_LABEL } else { item.label.as_str() };
            let path = item_path(&req.app_id, group, label, &item.key);

            self.client()
                .put(&path, &item.content)
                .inspect_err(|e| error!(key = %path, error = %e, "failed to set key"))?;
            for (tag, value) in &item.tags {
                let tag_path = format!("{}/{}", path, tag);
                self.client()
                    .put(&tag_path, value)
                    .inspect_err(|e| error!(key = %tag_path, error = %e, "failed to set tag"))?;
            }
        }
        Ok(())
    }

    fn delete(&self, req: &DeleteRequest) -> Result<()> {
        if req.app_id.is_empty() {
            return Err(ConfigStoreError::missing("app_id"));
        }
        let group = if req.group.is_empty() { DEFAULT_GROUP } else { req.group.as_str() };
        let label = if req.label.is_empty() { DEFAULT_LABEL } else { req.label.as_str() };
        for key in &req.keys {
            let path = item_path(&req.app_id, group, label, key);
            self.client()
                .delete(&path)
                .and_then(|()| self.client().delete_prefix(&format!("{}/", path)))
                .inspect_err(|e| error!(key = %path, error = %e, "failed to delete key"))?;
        }
        Ok(())
    }

    fn subscribe(&self, req: &SubscribeRequest, sender: Sender<Notification>) -> Result<()> {
        // Every item has a label in etcd, so key-level topics need one too.
        let mut req = req.clone();
        if req.label.is_empty() {
            req.label = DEFAULT_LABEL.to_string();
        }

        let namespaces = if req.group.is_empty() && req.keys.is_empty() {
            let prefix = self.watch_prefix();
            let groups: BTreeSet<String> = self
                .client()
                .get_prefix(&prefix)?
                .iter()
                .filter_map(|kv| parse_path(&self.accessor.app_id, &kv.key))
                .map(|path| path.group.to_string())
                .collect();
            if groups.is_empty() {
                vec![DEFAULT_GROUP.to_string()]
            } else {
                groups.into_iter().collect()
            }
        } else {
            Vec::new()
        };

        let topics = expand_subscription(&req, DEFAULT_GROUP, &namespaces, &self.accessor.codec);
        debug!(app_id = %self.accessor.app_id, topics = topics.len(), "etcd subscribe");
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
        &self.accessor.store_name
    }

    fn app_id(&self) -> &str {
        &self.accessor.app_id
    }
}
