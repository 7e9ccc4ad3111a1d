//! Apollo configuration store.
//!
//! Reads come from the Apollo client's local cache, writes go through the
//! Apollo Open API and are released with a commit. Tags are kept as JSON in
//! a dedicated namespace, keyed by `group{delimiter}keyWithLabel`.
//!
//! The client SDK and the HTTP calls are behind [`ApolloRepository`] and
//! [`ApolloOpenApi`]; this module owns the key conventions, the request
//! levels and the translation of Apollo change events.

use crossbeam_channel::Sender;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{ConfigStoreError, Result};
use crate::health::ComponentIndicators;
use crate::keys::{KeyCodec, DEFAULT_DELIMITER};
use crate::store::{expand_subscription, parse_namespaces, register_topics, ConfigStore};
use crate::subscriptions::{ChangeListener, ListenerStore};
use crate::types::{
    ChangeEvent, ConfigChange, ConfigurationItem, DeleteRequest, GetRequest, Notification,
    SetRequest, StoreConfig, SubscribeRequest,
};

pub const DEFAULT_NAMESPACE: &str = "application";
pub const DEFAULT_TAGS_NAMESPACE: &str = "sidecar_config_tags";
pub const DEFAULT_ENV: &str = "DEV";
const DEFAULT_IS_BACKUP_CONFIG: bool = true;

// --- Native change events ---

/// Change type as reported by the Apollo client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApolloChangeType {
    Added,
    Modified,
    Deleted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApolloConfigChange {
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub change_type: ApolloChangeType,
}

/// Change event for one namespace as delivered by the Apollo client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApolloChangeEvent {
    pub namespace: String,
    pub changes: BTreeMap<String, ApolloConfigChange>,
}

impl From<&ApolloChangeEvent> for ChangeEvent {
    fn from(native: &ApolloChangeEvent) -> Self {
        let mut event = ChangeEvent::new(native.namespace.clone());
        for (key, change) in &native.changes {
            let canonical = match change.change_type {
                ApolloChangeType::Deleted => ConfigChange::delete(change.old_value.clone()),
                ApolloChangeType::Added | ApolloChangeType::Modified => ConfigChange::put(
                    change.old_value.clone(),
                    change.new_value.clone().unwrap_or_default(),
                ),
            };
            event = event.with_change(key.clone(), canonical);
        }
        event
    }
}

/// Callback the Apollo client invokes from its notification thread.
pub type ApolloChangeCallback = Arc<dyn Fn(&ApolloChangeEvent) + Send + Sync>;

// --- Collaborators ---

/// Read access to one Apollo client's cache.
pub trait ApolloRepository: Send + Sync {
    /// `None` when the key is absent.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    /// Every `(keyWithLabel, value)` of a namespace.
    fn entries(&self, namespace: &str) -> Result<Vec<(String, String)>>;

    fn add_change_listener(&self, callback: ApolloChangeCallback);
}

/// Where an Open API write lands.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NamespaceTarget {
    pub env: String,
    pub app_id: String,
    pub cluster: String,
    pub namespace: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamespaceCreation {
    Created,
    AlreadyExists,
}

/// Write access through the Apollo Open API.
pub trait ApolloOpenApi: Send + Sync {
    fn create_namespace(&self, target: &NamespaceTarget) -> Result<NamespaceCreation>;

    /// Create or overwrite an item.
    fn set_item(&self, target: &NamespaceTarget, key_with_label: &str, value: &str) -> Result<()>;

    fn delete_item(&self, target: &NamespaceTarget, key_with_label: &str) -> Result<()>;

    /// Release the namespace so clients observe the changes.
    fn commit(&self, target: &NamespaceTarget) -> Result<()>;
}

/// Everything the store talks to.
pub struct ApolloCollaborators {
    pub kv_repo: Arc<dyn ApolloRepository>,
    pub tags_repo: Arc<dyn ApolloRepository>,
    pub open_api: Arc<dyn ApolloOpenApi>,
}

// --- Configuration ---

/// Settings parsed from [`StoreConfig`] metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApolloConfig {
    pub address: String,
    pub app_id: String,
    pub store_name: String,
    pub cluster: String,
    /// Namespaces covered by app-level requests.
    pub namespaces: Vec<String>,
    pub is_backup_config: bool,
    pub secret: Option<String>,
    pub open_api_token: String,
    pub open_api_address: String,
    pub open_api_user: String,
}

impl ApolloConfig {
    pub fn from_store_config(config: &StoreConfig) -> Result<Self> {
        if config.metadata.is_empty() {
            return Err(ConfigStoreError::missing("metadata"));
        }
        let address = config
            .address
            .first()
            .filter(|a| !a.is_empty())
            .cloned()
            .ok_or_else(|| ConfigStoreError::missing("address"))?;

        let is_backup_config = match config.meta("is_backup_config") {
            Some(raw) => raw.parse::<bool>().map_err(|e| {
                ConfigStoreError::InvalidConfig(format!("is_backup_config {:?}: {}", raw, e))
            })?,
            None => DEFAULT_IS_BACKUP_CONFIG,
        };

        let required = |name: &str| -> Result<String> {
            config
                .meta(name)
                .map(str::to_string)
                .ok_or_else(|| ConfigStoreError::missing(name))
        };

        Ok(Self {
            address,
            app_id: required("app_id")?,
            store_name: config.store_name.clone(),
            cluster: config.meta("cluster").unwrap_or_default().to_string(),
            namespaces: parse_namespaces(config.meta("namespace_name").unwrap_or_default()),
            is_backup_config,
            secret: config.meta("secret").map(str::to_string),
            open_api_token: required("open_api_token")?,
            open_api_address: required("open_api_address")?,
            open_api_user: required("open_api_user")?,
        })
    }
}

// --- Listener side ---

struct ApolloListenerStore {
    codec: KeyCodec,
    tags_namespace: String,
    tags_repo: Arc<dyn ApolloRepository>,
    app_id: String,
    store_name: String,
}

impl ListenerStore for ApolloListenerStore {
    fn split_key(&self, key_with_label: &str) -> (String, String) {
        self.codec.split_key(key_with_label)
    }

    fn get_all_tags(&self, group: &str, key_with_label: &str) -> Result<HashMap<String, String>> {
        let tag_key = self.codec.concatenate_key_for_tag(group, key_with_label);
        // A failed or empty lookup means the item has no tags.
        let raw = match self.tags_repo.get(&self.tags_namespace, &tag_key) {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            _ => return Ok(HashMap::new()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    fn app_id(&self) -> String {
        self.app_id.clone()
    }

    fn store_name(&self) -> String {
        self.store_name.clone()
    }
}

// --- Store ---

/// Configuration store backed by Apollo.
pub struct ApolloConfigStore {
    config: ApolloConfig,
    env: String,
    tags_namespace: String,
    accessor: Arc<ApolloListenerStore>,
    kv_repo: Arc<dyn ApolloRepository>,
    open_api: Arc<dyn ApolloOpenApi>,
    listener: Arc<ChangeListener>,
    indicators: ComponentIndicators,
}

impl ApolloConfigStore {
    /// Validate the config, make sure the tag namespace exists and start
    /// listening for changes on the kv repository.
    pub fn open(
        config: &StoreConfig,
        collaborators: ApolloCollaborators,
        indicators: ComponentIndicators,
    ) -> Result<Self> {
        let result = Self::build(config, collaborators, indicators.clone());
        indicators.track(result)
    }

    fn build(
        store_config: &StoreConfig,
        collaborators: ApolloCollaborators,
        indicators: ComponentIndicators,
    ) -> Result<Self> {
        let config = ApolloConfig::from_store_config(store_config)?;
        let env = DEFAULT_ENV.to_string();
        let tags_namespace = DEFAULT_TAGS_NAMESPACE.to_string();

        let tags_target = NamespaceTarget {
            env: env.clone(),
            app_id: config.app_id.clone(),
            cluster: config.cluster.clone(),
            namespace: tags_namespace.clone(),
        };
        match collaborators.open_api.create_namespace(&tags_target)? {
            NamespaceCreation::Created => collaborators.open_api.commit(&tags_target)?,
            NamespaceCreation::AlreadyExists => {
                debug!(namespace = %tags_namespace, "tags namespace already exists")
            }
        }

        let accessor = Arc::new(ApolloListenerStore {
            codec: KeyCodec::new(DEFAULT_DELIMITER),
            tags_namespace: tags_namespace.clone(),
            tags_repo: collaborators.tags_repo,
            app_id: config.app_id.clone(),
            store_name: config.store_name.clone(),
        });
        let listener = Arc::new(ChangeListener::with_config(
            accessor.clone(),
            store_config.listener_config(),
        ));

        let dispatcher = Arc::clone(&listener);
        collaborators
            .kv_repo
            .add_change_listener(Arc::new(move |native: &ApolloChangeEvent| {
                dispatcher.on_change(&ChangeEvent::from(native));
            }));

        Ok(Self {
            config,
            env,
            tags_namespace,
            accessor,
            kv_repo: collaborators.kv_repo,
            open_api: collaborators.open_api,
            listener,
            indicators,
        })
    }

    pub fn listener(&self) -> &ChangeListener {
        &self.listener
    }

    pub fn indicators(&self) -> &ComponentIndicators {
        &self.indicators
    }

    pub fn config(&self) -> &ApolloConfig {
        &self.config
    }

    fn codec(&self) -> &KeyCodec {
        &self.accessor.codec
    }

    fn target(&self, app_id: &str, namespace: &str) -> NamespaceTarget {
        NamespaceTarget {
            env: self.env.clone(),
            app_id: app_id.to_string(),
            cluster: self.config.cluster.clone(),
            namespace: namespace.to_string(),
        }
    }

    fn tags_for(&self, group: &str, key_with_label: &str) -> HashMap<String, String> {
        self.accessor
            .get_all_tags(group, key_with_label)
            .unwrap_or_else(|e| {
                error!(group, key = key_with_label, error = %e, "failed to query tags");
                HashMap::new()
            })
    }

    fn get_keys(&self, group: &str, keys: &[String], label: &str) -> Vec<ConfigurationItem> {
        debug!(namespace = group, ?keys, label, "get keys");
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let key_with_label = self.codec().concatenate_key(key, label);
            let content = match self.kv_repo.get(group, &key_with_label) {
                Ok(Some(content)) => content,
                Ok(None) => continue,
                Err(e) => {
                    // Skip the key, keep the rest
                    error!(namespace = group, key = %key_with_label, error = %e, "failed to query configuration");
                    continue;
                }
            };
            items.push(ConfigurationItem {
                group: group.to_string(),
                key: key.clone(),
                label: label.to_string(),
                content,
                tags: self.tags_for(group, &key_with_label),
                ..Default::default()
            });
        }
        items
    }

    fn get_all_with_namespace(&self, group: &str) -> Result<Vec<ConfigurationItem>> {
        debug!(namespace = group, "get all with namespace");
        let entries = self.kv_repo.entries(group)?;
        let mut items = Vec::with_capacity(entries.len());
        for (key_with_label, content) in entries {
            if key_with_label.is_empty() {
                error!(namespace = group, "configuration item with blank key");
                continue;
            }
            let (key, label) = self.codec().split_key(&key_with_label);
            items.push(ConfigurationItem {
                group: group.to_string(),
                key,
                label,
                content,
                tags: self.tags_for(group, &key_with_label),
                ..Default::default()
            });
        }
        Ok(items)
    }

    fn get_all_with_app_id(&self) -> Result<Vec<ConfigurationItem>> {
        let mut items = Vec::new();
        for namespace in &self.config.namespaces {
            items.extend(self.get_all_with_namespace(namespace)?);
        }
        Ok(items)
    }
}

impl ConfigStore for ApolloConfigStore {
    fn get(&self, req: &GetRequest) -> Result<Vec<ConfigurationItem>> {
        let group = if req.group.is_empty() && !req.keys.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            req.group.as_str()
        };

        if group.is_empty() {
            return self.get_all_with_app_id();
        }
        if req.keys.is_empty() {
            return self.get_all_with_namespace(group);
        }
        Ok(self.get_keys(group, &req.keys, &req.label))
    }

    fn set(&self, req: &SetRequest) -> Result<()> {
        if req.app_id.is_empty() {
            return Err(ConfigStoreError::missing("app_id"));
        }
        if req.items.is_empty() {
            return Err(ConfigStoreError::missing("items"));
        }

        let mut groups = HashSet::new();
        let tags_target = self.target(&req.app_id, &self.tags_namespace);
        for item in &req.items {
            let key_with_label = self.codec().concatenate_key(&item.key, &item.label);
            self.open_api.set_item(
                &self.target(&req.app_id, &item.group),
                &key_with_label,
                &item.content,
            )?;
            groups.insert(item.group.clone());

            if item.tags.is_empty() {
                continue;
            }
            let tag_key = self.codec().concatenate_key_for_tag(&item.group, &key_with_label);
            let tags = serde_json::to_string(&item.tags)?;
            self.open_api.set_item(&tags_target, &tag_key, &tags)?;
        }

        self.open_api.commit(&tags_target)?;
        for group in groups {
            self.open_api.commit(&self.target(&req.app_id, &group))?;
        }
        Ok(())
    }

    fn delete(&self, req: &DeleteRequest) -> Result<()> {
        if req.app_id.is_empty() {
            return Err(ConfigStoreError::missing("app_id"));
        }
        if req.keys.is_empty() {
            return Err(ConfigStoreError::missing("keys"));
        }
        let group = if req.group.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            req.group.as_str()
        };

        let kv_target = self.target(&req.app_id, group);
        let tags_target = self.target(&req.app_id, &self.tags_namespace);
        for key in &req.keys {
            let key_with_label = self.codec().concatenate_key(key, &req.label);
            self.open_api.delete_item(&kv_target, &key_with_label)?;
            let tag_key = self.codec().concatenate_key_for_tag(group, &key_with_label);
            self.open_api.delete_item(&tags_target, &tag_key)?;
        }

        self.open_api.commit(&tags_target)?;
        self.open_api.commit(&kv_target)
    }

    fn subscribe(&self, req: &SubscribeRequest, sender: Sender<Notification>) -> Result<()> {
        let topics = expand_subscription(req, DEFAULT_NAMESPACE, &self.config.namespaces, self.codec());
        register_topics(&self.listener, &topics, &sender)
    }

    fn stop_subscribe(&self) {
        // Single API connection per store, so stopping drops everyone.
        self.listener.reset();
    }

    fn default_group(&self) -> &str {
        DEFAULT_NAMESPACE
    }

    fn default_label(&self) -> &str {
        ""
    }

    fn store_name(&self) -> &str {
        &self.config.store_name
    }

    fn app_id(&self) -> &str {
        &self.config.app_id
    }
}
