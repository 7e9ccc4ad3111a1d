//! Core types shared by every configuration store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::subscriptions::ListenerConfig;

/// A single configuration item as exchanged with applications.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationItem {
    pub key: String,
    pub content: String,
    pub group: String,
    pub label: String,
    /// Per-item metadata side-loaded from the store's tag namespace.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl ConfigurationItem {
    pub fn new(group: impl Into<String>, key: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            key: key.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }
}

/// Notification pushed to a subscriber when configuration changes.
///
/// A deleted key is delivered with an empty `content`, which makes it
/// indistinguishable from a key set to the empty string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub store_name: String,
    pub app_id: String,
    pub items: Vec<ConfigurationItem>,
}

/// Query for configuration items.
#[derive(Clone, Debug, Default)]
pub struct GetRequest {
    pub app_id: String,
    /// Empty with no keys means every configured namespace of the app.
    pub group: String,
    pub label: String,
    /// Empty means every key in `group`.
    pub keys: Vec<String>,
    pub metadata: HashMap<String, String>,
}

/// Write of one or more configuration items.
#[derive(Clone, Debug, Default)]
pub struct SetRequest {
    pub store_name: String,
    pub app_id: String,
    pub items: Vec<ConfigurationItem>,
}

/// Removal of keys from a group.
#[derive(Clone, Debug, Default)]
pub struct DeleteRequest {
    pub app_id: String,
    pub group: String,
    pub label: String,
    pub keys: Vec<String>,
    pub metadata: HashMap<String, String>,
}

/// Request to be notified about changes.
///
/// The same three levels as [`GetRequest`] apply: no group and no keys
/// subscribes to the whole app, a group without keys subscribes to the
/// group, and keys subscribe to individual items.
#[derive(Clone, Debug, Default)]
pub struct SubscribeRequest {
    pub app_id: String,
    pub group: String,
    pub label: String,
    pub keys: Vec<String>,
    pub metadata: HashMap<String, String>,
}

impl From<&SubscribeRequest> for GetRequest {
    fn from(req: &SubscribeRequest) -> Self {
        GetRequest {
            app_id: req.app_id.clone(),
            group: req.group.clone(),
            label: req.label.clone(),
            keys: req.keys.clone(),
            metadata: req.metadata.clone(),
        }
    }
}

/// Default time the dispatcher waits on one subscriber before evicting it.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 2000;

/// Store configuration, as loaded from the runtime's component config.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub store_name: String,
    pub app_id: String,
    pub address: Vec<String>,
    /// Connect timeout towards the backend.
    pub timeout_secs: Option<u64>,
    /// Bounded-send timeout for change notifications.
    pub response_timeout_ms: Option<u64>,
    /// Backend-specific settings.
    pub metadata: HashMap<String, String>,
}

impl StoreConfig {
    pub fn from_json(data: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            response_timeout: Duration::from_millis(
                self.response_timeout_ms
                    .unwrap_or(DEFAULT_RESPONSE_TIMEOUT_MS),
            ),
        }
    }

    /// Look up a metadata value, treating empty strings as absent.
    pub fn meta(&self, name: &str) -> Option<&str> {
        self.metadata
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

// --- Canonical change event ---

/// Kind of change observed by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Put,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Put => write!(f, "PUT"),
            ChangeKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// A change to one key, in backend-agnostic form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigChange {
    pub old_value: Option<String>,
    /// Always `None` for deletes.
    pub new_value: Option<String>,
    pub kind: ChangeKind,
}

impl ConfigChange {
    pub fn put(old_value: Option<String>, new_value: impl Into<String>) -> Self {
        Self {
            old_value,
            new_value: Some(new_value.into()),
            kind: ChangeKind::Put,
        }
    }

    pub fn delete(old_value: Option<String>) -> Self {
        Self {
            old_value,
            new_value: None,
            kind: ChangeKind::Delete,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.kind == ChangeKind::Delete
    }
}

/// A batch of changes within one namespace, in the order the backend
/// reported them. Keys carry their label (see [`crate::KeyCodec`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub namespace: String,
    pub changes: Vec<(String, ConfigChange)>,
}

impl ChangeEvent {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            changes: Vec::new(),
        }
    }

    pub fn with_change(mut self, key_with_label: impl Into<String>, change: ConfigChange) -> Self {
        self.changes.push((key_with_label.into(), change));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
