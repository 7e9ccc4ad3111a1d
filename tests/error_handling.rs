//! Error handling and failure-path tests.

use crossbeam_channel::{bounded, unbounded};
use sidecar_configstore::stores::nacos::NacosConfig;
use sidecar_configstore::stores::ApolloConfig;
use sidecar_configstore::{
    ChangeEvent, ChangeListener, ComponentIndicators, ConfigChange, ConfigStoreError, KeyCodec,
    ListenerConfig, ListenerStore, Result, StoreConfig, SubscriberRegistry,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct FlakyStore {
    codec: KeyCodec,
}

impl ListenerStore for FlakyStore {
    fn split_key(&self, key_with_label: &str) -> (String, String) {
        self.codec.split_key(key_with_label)
    }

    fn get_all_tags(&self, group: &str, _key_with_label: &str) -> Result<HashMap<String, String>> {
        Err(ConfigStoreError::Backend(format!("tags namespace for {} unavailable", group)))
    }

    fn app_id(&self) -> String {
        "app".to_string()
    }

    fn store_name(&self) -> String {
        "flaky".to_string()
    }
}

fn listener(timeout: Duration) -> ChangeListener {
    ChangeListener::with_config(
        Arc::new(FlakyStore {
            codec: KeyCodec::default(),
        }),
        ListenerConfig {
            response_timeout: timeout,
        },
    )
}

fn change(key: &str) -> ChangeEvent {
    ChangeEvent::new("application").with_change(key, ConfigChange::put(None, "v"))
}

// --- Registry ---

#[test]
fn test_remove_twice_is_harmless() {
    let registry = SubscriberRegistry::new();
    let (tx, _rx) = unbounded();
    let first = registry.add_by_topic("g", "k", tx.clone()).unwrap();
    let second = registry.add_by_topic("g", "k", tx).unwrap();

    registry.remove(&first);
    registry.remove(&first);

    let left = registry.find_by_topic("g", "k");
    assert_eq!(left.len(), 1);
    assert!(Arc::ptr_eq(&left[0], &second));
}

#[test]
fn test_remove_foreign_subscription_is_harmless() {
    let registry = SubscriberRegistry::new();
    let other = SubscriberRegistry::new();
    let (tx, _rx) = unbounded();
    registry.add_by_topic("g", "k", tx.clone()).unwrap();
    let foreign = other.add_by_topic("g", "k", tx).unwrap();

    registry.remove(&foreign);

    assert_eq!(registry.find_by_topic("g", "k").len(), 1);
}

#[test]
fn test_empty_group_rejected() {
    let registry = SubscriberRegistry::new();
    let (tx, _rx) = unbounded();

    let result = registry.add_by_topic("", "k", tx);
    assert!(matches!(result, Err(ConfigStoreError::InvalidArgument(_))));
    assert!(registry.is_empty());
}

#[test]
fn test_unknown_topic_is_empty() {
    let registry = SubscriberRegistry::new();
    assert!(registry.find_by_topic("nope", "").is_empty());
    registry.reset();
    assert!(registry.is_empty());
}

// --- Delivery ---

#[test]
fn test_tag_failure_does_not_block_delivery() {
    let lis = listener(Duration::from_secs(1));
    let (tx, rx) = unbounded();
    lis.add_by_topic("application", "k", tx).unwrap();

    lis.on_change(&change("k"));

    let resp = rx.try_recv().unwrap();
    assert_eq!(resp.items[0].content, "v");
    assert!(resp.items[0].tags.is_empty());
    assert_eq!(lis.subscribers().subscription_count(), 1);
}

#[test]
fn test_receiver_dropped_during_delivery() {
    for _ in 0..20 {
        let lis = Arc::new(listener(Duration::from_millis(500)));
        let (tx, rx) = bounded(0);
        lis.add_by_topic("application", "k", tx).unwrap();

        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            drop(rx);
        });
        let dispatcher = {
            let lis = lis.clone();
            thread::spawn(move || lis.on_change(&change("k")))
        };

        closer.join().unwrap();
        assert!(dispatcher.join().is_ok());
        assert!(lis.subscribers().is_empty());
    }
}

#[test]
fn test_one_closed_channel_does_not_affect_others() {
    let lis = listener(Duration::from_secs(1));
    let (closed_tx, closed_rx) = unbounded();
    let (open_tx, open_rx) = unbounded();
    lis.add_by_topic("application", "", closed_tx).unwrap();
    lis.add_by_topic("application", "", open_tx).unwrap();

    drop(closed_rx);
    lis.on_change(&change("k1"));
    lis.on_change(&change("k2"));

    assert_eq!(open_rx.try_iter().count(), 2);
    assert_eq!(lis.subscribers().subscription_count(), 1);
}

// --- Configuration ---

#[test]
fn test_apollo_requires_metadata() {
    let result = ApolloConfig::from_store_config(&StoreConfig::default());
    assert!(matches!(result, Err(ConfigStoreError::MissingField(f)) if f == "metadata"));
}

#[test]
fn test_apollo_rejects_bad_backup_flag() {
    let config = StoreConfig {
        address: vec!["http://apollo:8080".into()],
        metadata: HashMap::from([
            ("app_id".to_string(), "app".to_string()),
            ("is_backup_config".to_string(), "maybe".to_string()),
        ]),
        ..Default::default()
    };
    let result = ApolloConfig::from_store_config(&config);
    assert!(matches!(result, Err(ConfigStoreError::InvalidConfig(_))));
}

#[test]
fn test_nacos_rejects_bad_address() {
    let config = StoreConfig {
        store_name: "nacos".into(),
        app_id: "app".into(),
        address: vec!["127.0.0.1".into()],
        ..Default::default()
    };
    let result = NacosConfig::from_store_config(&config);
    assert!(matches!(result, Err(ConfigStoreError::InvalidConfig(_))));
}

#[test]
fn test_invalid_json_config() {
    let result = StoreConfig::from_json("{ not json");
    assert!(matches!(result, Err(ConfigStoreError::Serialization(_))));
}

#[test]
fn test_tracked_failure_marks_liveness_down() {
    let indicators = ComponentIndicators::new();
    let result: Result<()> = indicators.track(Err(ConfigStoreError::Backend("unreachable".into())));

    assert!(result.is_err());
    assert!(!indicators.liveness.is_healthy());
    assert!(!indicators.readiness.is_healthy());
}

#[test]
fn test_error_messages() {
    assert_eq!(
        ConfigStoreError::missing("app_id").to_string(),
        "Missing field: app_id"
    );
    assert_eq!(ConfigStoreError::IllegalParam.to_string(), "Illegal parameter");
}
