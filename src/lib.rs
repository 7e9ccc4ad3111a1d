//! # Sidecar Config Store
//!
//! Configuration-change subscriptions for sidecar configuration stores.
//!
//! Applications subscribe to a whole app, a group, or individual keys and
//! receive a [`Notification`] on a channel whenever a matching item
//! changes. Backend adapters (Apollo, Nacos, etcd, in-memory) translate
//! their native change events into [`ChangeEvent`]s and hand them to a
//! [`ChangeListener`], which resolves subscribers and delivers with a
//! bounded wait.
//!
//! ## Example
//!
//! ```ignore
//! use sidecar_configstore::{
//!     ComponentIndicators, ConfigStore, ConfigurationItem, InMemoryConfigStore, SetRequest,
//!     StoreConfig, SubscribeRequest,
//! };
//!
//! let store = InMemoryConfigStore::open(&StoreConfig::default(), ComponentIndicators::new())?;
//!
//! let (tx, rx) = crossbeam_channel::bounded(16);
//! store.subscribe(&SubscribeRequest { group: "default".into(), ..Default::default() }, tx)?;
//!
//! store.set(&SetRequest {
//!     items: vec![ConfigurationItem::new("default", "db_url", "mysql://db")],
//!     ..Default::default()
//! })?;
//!
//! let notification = rx.recv()?;
//! ```

pub mod error;
pub mod health;
pub mod keys;
pub mod store;
pub mod stores;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{ConfigStoreError, Result};
pub use health::{ComponentIndicators, HealthIndicator, HealthReport, HealthStatus};
pub use keys::{KeyCodec, DEFAULT_DELIMITER};
pub use store::{expand_subscription, parse_namespaces, register_topics, ConfigStore};
pub use stores::{
    ApolloConfigStore, EtcdConfigStore, InMemoryConfigStore, NacosConfigStore,
};
pub use subscriptions::{
    ChangeListener, DeliveryOutcome, ListenerConfig, ListenerStore, SubscriberRegistry,
    Subscription, TopicKey,
};
pub use types::{
    ChangeEvent, ChangeKind, ConfigChange, ConfigurationItem, DeleteRequest, GetRequest,
    Notification, SetRequest, StoreConfig, SubscribeRequest, DEFAULT_RESPONSE_TIMEOUT_MS,
};
