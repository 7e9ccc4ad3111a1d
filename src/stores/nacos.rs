//! Nacos configuration store.
//!
//! Nacos pushes changes per `(group, dataId)` through listener callbacks,
//! so subscribing starts one SDK listener per item and each callback is
//! turned into a single-change event for the shared listener. Nacos has no
//! labels or tags.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{ConfigStoreError, Result};
use crate::health::ComponentIndicators;
use crate::keys::KeyCodec;
use crate::store::{expand_subscription, register_topics, ConfigStore};
use crate::subscriptions::{ChangeListener, ListenerStore};
use crate::types::{
    ChangeEvent, ConfigChange, ConfigurationItem, DeleteRequest, GetRequest, Notification,
    SetRequest, StoreConfig, SubscribeRequest,
};

pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";
const DEFAULT_LABEL: &str = "";
/// Seconds.
const DEFAULT_TIMEOUT: u64 = 10;

pub const PAGE_NO: &str = "PageNo";
pub const PAGE_SIZE: &str = "PageSize";

/// Page selection for searches; zero means the SDK default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pagination {
    pub page_no: u32,
    pub page_size: u32,
}

impl Pagination {
    /// Read `PageNo`/`PageSize`. Any unparsable value resets both to zero.
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Self {
        let parse = |name: &str| -> std::result::Result<u32, ()> {
            match metadata.get(name) {
                Some(raw) => raw.parse().map_err(|_| ()),
                None => Ok(0),
            }
        };
        match (parse(PAGE_NO), parse(PAGE_SIZE)) {
            (Ok(page_no), Ok(page_size)) => Self { page_no, page_size },
            _ => Self::default(),
        }
    }
}

/// One search result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NacosConfigItem {
    pub data_id: String,
    pub group: String,
    pub content: String,
}

/// Listener callback: `(namespace, group, dataId, data)`.
pub type NacosListener = Arc<dyn Fn(&str, &str, &str, &str) + Send + Sync>;

/// The subset of the Nacos config client this store uses.
pub trait NacosClient: Send + Sync {
    /// Empty content means the config does not exist.
    fn get_config(&self, group: &str, data_id: &str, app_name: &str) -> Result<String>;

    /// Exact search by app, optionally narrowed to one group.
    fn search_config(
        &self,
        app_name: &str,
        group: Option<&str>,
        pagination: Pagination,
    ) -> Result<Vec<NacosConfigItem>>;

    fn publish_config(&self, group: &str, data_id: &str, app_name: &str, content: &str) -> Result<bool>;

    fn delete_config(&self, group: &str, data_id: &str, app_name: &str) -> Result<bool>;

    fn listen_config(
        &self,
        group: &str,
        data_id: &str,
        app_name: &str,
        on_change: NacosListener,
    ) -> Result<()>;

    fn cancel_listen_config(&self, group: &str, data_id: &str, app_name: &str) -> Result<()>;
}

/// Settings parsed from [`StoreConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NacosConfig {
    pub store_name: String,
    pub app_id: String,
    /// `(ip, port)` pairs.
    pub servers: Vec<(String, u16)>,
    pub namespace_id: String,
    pub timeout_ms: u64,
}

impl NacosConfig {
    pub fn from_store_config(config: &StoreConfig) -> Result<Self> {
        if config.store_name.is_empty() {
            return Err(ConfigStoreError::missing("store_name"));
        }
        if config.app_id.is_empty() {
            return Err(ConfigStoreError::missing("app_id"));
        }
        if config.address.is_empty() {
            return Err(ConfigStoreError::missing("address"));
        }

        let servers = config
            .address
            .iter()
            .map(|addr| parse_server(addr))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            store_name: config.store_name.clone(),
            app_id: config.app_id.clone(),
            servers,
            namespace_id: config.meta("namespace_id").unwrap_or_default().to_string(),
            timeout_ms: config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT) * 1000,
        })
    }
}

fn parse_server(addr: &str) -> Result<(String, u16)> {
    let (ip, port) = addr.split_once(':').ok_or_else(|| {
        ConfigStoreError::InvalidConfig(format!("address {:?} is not in the format of ip:port", addr))
    })?;
    let port = port
        .parse::<u16>()
        .map_err(|e| ConfigStoreError::InvalidConfig(format!("port of {:?}: {}", addr, e)))?;
    Ok((ip.to_string(), port))
}

/// Turn one Nacos callback into a change event. Nacos reports a deleted
/// config as empty content.
pub fn translate(group: &str, data_id: &str, data: &str) -> ChangeEvent {
    let change = if data.is_empty() {
        ConfigChange::delete(None)
    } else {
        ConfigChange::put(None, data)
    };
    ChangeEvent::new(group).with_change(data_id, change)
}

struct NacosListenerStore {
    app_id: String,
    store_name: String,
}

impl ListenerStore for NacosListenerStore {
    fn split_key(&self, key_with_label: &str) -> (String, String) {
        (key_with_label.to_string(), String::new())
    }

    fn get_all_tags(&self, _group: &str, _key_with_label: &str) -> Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }

    fn app_id(&self) -> String {
        self.app_id.clone()
    }

    fn store_name(&self) -> String {
        self.store_name.clone()
    }
}

/// Configuration store backed by Nacos.
pub struct NacosConfigStore {
    config: NacosConfig,
    client: Arc<dyn NacosClient>,
    listener: Arc<ChangeListener>,
    /// `(group, dataId)` pairs with an SDK listener attached.
    listening: Mutex<BTreeSet<(String, String)>>,
    indicators: ComponentIndicators,
}

impl NacosConfigStore {
    pub fn open(
        config: &StoreConfig,
        client: Arc<dyn NacosClient>,
        indicators: ComponentIndicators,
    ) -> Result<Self> {
        let result = NacosConfig::from_store_config(config).map(|nacos| {
            let accessor = Arc::new(NacosListenerStore {
                app_id: nacos.app_id.clone(),
                store_name: nacos.store_name.clone(),
            });
            Self {
                listener: Arc::new(ChangeListener::with_config(accessor, config.listener_config())),
                config: nacos,
                client,
                listening: Mutex::new(BTreeSet::new()),
                indicators: indicators.clone(),
            }
        });
        indicators.track(result)
    }

    pub fn listener(&self) -> &ChangeListener {
        &self.listener
    }

    pub fn indicators(&self) -> &ComponentIndicators {
        &self.indicators
    }

    pub fn config(&self) -> &NacosConfig {
        &self.config
    }

    /// `(group, dataId)` pairs currently listened on.
    pub fn listening(&self) -> Vec<(String, String)> {
        self.listening.lock().iter().cloned().collect()
    }

    fn search(&self, group: Option<&str>, pagination: Pagination) -> Result<Vec<ConfigurationItem>> {
        let found = self
            .client
            .search_config(&self.config.app_id, group, pagination)
            .inspect_err(|e| error!(?group, error = %e, "failed to search configs"))?;
        Ok(found
            .into_iter()
            .map(|c| ConfigurationItem::new(c.group, c.data_id, c.content))
            .collect())
    }

    fn get_keys(&self, group: &str, keys: &[String]) -> Result<Vec<ConfigurationItem>> {
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let content = self
                .client
                .get_config(group, key, &self.config.app_id)
                .inspect_err(|e| error!(group, key = %key, error = %e, "failed to get config"))?;
            // Nacos has no empty configs: empty means absent.
            if content.is_empty() {
                continue;
            }
            items.push(ConfigurationItem::new(group, key.clone(), content));
        }
        Ok(items)
    }

    fn listen(&self, group: &str, data_id: &str) -> Result<()> {
        let entry = (group.to_string(), data_id.to_string());
        // Reserve before attaching so concurrent subscribes attach one SDK listener.
        if !self.listening.lock().insert(entry.clone()) {
            return Ok(());
        }

        let dispatcher = Arc::clone(&self.listener);
        let attached = self.client.listen_config(
            group,
            data_id,
            &self.config.app_id,
            Arc::new(move |_namespace: &str, group: &str, data_id: &str, data: &str| {
                dispatcher.on_change(&translate(group, data_id, data));
            }),
        );
        if let Err(e) = attached {
            self.listening.lock().remove(&entry);
            error!(group, data_id, error = %e, "failed to listen on nacos config");
            return Err(e);
        }

        debug!(group, data_id, "listening on nacos config");
        Ok(())
    }
}

impl ConfigStore for NacosConfigStore {
    fn get(&self, req: &GetRequest) -> Result<Vec<ConfigurationItem>> {
        let group = if req.group.is_empty() && !req.keys.is_empty() {
            DEFAULT_GROUP
        } else {
            req.group.as_str()
        };
        let pagination = Pagination::from_metadata(&req.metadata);

        if group.is_empty() {
            return self.search(None, pagination);
        }
        if req.keys.is_empty() {
            return self.search(Some(group), pagination);
        }
        self.get_keys(group, &req.keys)
    }

    fn set(&self, req: &SetRequest) -> Result<()> {
        if req.app_id.is_empty() {
            return Err(ConfigStoreError::missing("app_id"));
        }
        if req.items.is_empty() {
            return Err(ConfigStoreError::missing("items"));
        }

        for item in &req.items {
            if item.group.is_empty() {
                return Err(ConfigStoreError::missing("group"));
            }
            let published = self
                .client
                .publish_config(&item.group, &item.key, &req.app_id, &item.content)
                .inspect_err(|e| error!(key = %item.key, error = %e, "failed to set key"))?;
            if !published {
                return Err(ConfigStoreError::IllegalParam);
            }
        }
        Ok(())
    }

    fn delete(&self, req: &DeleteRequest) -> Result<()> {
        if req.app_id.is_empty() {
            return Err(ConfigStoreError::missing("app_id"));
        }
        if req.group.is_empty() {
            return Err(ConfigStoreError::missing("group"));
        }
        if req.keys.is_empty() {
            return Err(ConfigStoreError::missing("keys"));
        }

        for key in &req.keys {
            let deleted = self
                .client
                .delete_config(&req.group, key, &req.app_id)
                .inspect_err(|e| error!(key = %key, error = %e, "failed to delete key"))?;
            if !deleted {
                return Err(ConfigStoreError::IllegalParam);
            }

            let entry = (req.group.clone(), key.clone());
            if self.listening.lock().remove(&entry) {
                if let Err(e) = self.client.cancel_listen_config(&req.group, key, &self.config.app_id) {
                    error!(group = %req.group, key = %key, error = %e, "failed to cancel listener");
                }
            }
        }
        Ok(())
    }

    fn subscribe(&self, req: &SubscribeRequest, sender: Sender<Notification>) -> Result<()> {
        let items = self.get(&GetRequest::from(req))?;

        // App level covers whatever groups the app currently has.
        let namespaces: Vec<String> = items
            .iter()
            .map(|item| item.group.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let topics = expand_subscription(req, DEFAULT_GROUP, &namespaces, &KeyCodec::default());
        register_topics(&self.listener, &topics, &sender)?;

        for item in &items {
            self.listen(&item.group, &item.key)?;
        }
        Ok(())
    }

    fn stop_subscribe(&self) {
        let entries = self.listening();
        for (group, data_id) in entries {
            match self.client.cancel_listen_config(&group, &data_id, &self.config.app_id) {
                Ok(()) => {
                    self.listening.lock().remove(&(group, data_id));
                }
                Err(e) => error!(
                    app_id = %self.config.app_id,
                    group = %group,
                    data_id = %data_id,
                    error = %e,
                    "failed to stop listening"
                ),
            }
        }
        self.listener.reset();
    }

    fn default_group(&self) -> &str {
        DEFAULT_GROUP
    }

    fn default_label(&self) -> &str {
        DEFAULT_LABEL
    }

    fn store_name(&self) -> &str {
        &self.config.store_name
    }

    fn app_id(&self) -> &str {
        &self.config.app_id
    }
}
