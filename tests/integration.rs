//! Integration tests for subscriptions and change dispatch.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError};
use sidecar_configstore::{
    ChangeEvent, ChangeListener, ComponentIndicators, ConfigChange, ConfigStore,
    ConfigurationItem, DeleteRequest, InMemoryConfigStore, KeyCodec, ListenerConfig,
    ListenerStore, Notification, Result, SetRequest, StoreConfig, SubscribeRequest,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const APP_ID: &str = "app1";
const STORE_NAME: &str = "config_demo";

struct StaticStore {
    codec: KeyCodec,
}

impl ListenerStore for StaticStore {
    fn split_key(&self, key_with_label: &str) -> (String, String) {
        self.codec.split_key(key_with_label)
    }

    fn get_all_tags(&self, _group: &str, _key_with_label: &str) -> Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }

    fn app_id(&self) -> String {
        APP_ID.to_string()
    }

    fn store_name(&self) -> String {
        STORE_NAME.to_string()
    }
}

fn listener(timeout: Duration) -> ChangeListener {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    ChangeListener::with_config(
        Arc::new(StaticStore {
            codec: KeyCodec::default(),
        }),
        ListenerConfig {
            response_timeout: timeout,
        },
    )
}

fn db_url_changed() -> ChangeEvent {
    ChangeEvent::new("application").with_change("db_url", ConfigChange::put(Some("old".into()), "new"))
}

fn memory_store() -> InMemoryConfigStore {
    InMemoryConfigStore::open(
        &StoreConfig {
            store_name: STORE_NAME.into(),
            app_id: APP_ID.into(),
            ..Default::default()
        },
        ComponentIndicators::new(),
    )
    .unwrap()
}

fn drain(rx: &Receiver<Notification>) -> Vec<Notification> {
    rx.try_iter().collect()
}

// --- Literal scenarios ---

#[test]
fn test_key_subscriber_receives_change() {
    let lis = listener(Duration::from_secs(2));
    let (tx, rx) = unbounded();
    lis.add_by_topic("application", "db_url", tx).unwrap();

    lis.on_change(&db_url_changed());

    let received = drain(&rx);
    assert_eq!(received.len(), 1);
    let item = &received[0].items[0];
    assert_eq!(item.group, "application");
    assert_eq!(item.key, "db_url");
    assert_eq!(item.content, "new");
    assert_eq!(received[0].store_name, STORE_NAME);
    assert_eq!(received[0].app_id, APP_ID);
}

#[test]
fn test_group_and_key_subscribers_both_receive() {
    let lis = listener(Duration::from_secs(2));
    let (group_tx, group_rx) = unbounded();
    let (key_tx, key_rx) = unbounded();
    lis.add_by_topic("application", "", group_tx).unwrap();
    lis.add_by_topic("application", "db_url", key_tx).unwrap();

    lis.on_change(&db_url_changed());

    for rx in [&group_rx, &key_rx] {
        let received = drain(rx);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].items[0].key, "db_url");
        assert_eq!(received[0].items[0].content, "new");
    }
}

#[test]
fn test_undrained_subscriber_removed_after_timeout() {
    let timeout = Duration::from_millis(100);
    let lis = listener(timeout);
    let (tx, _rx) = bounded(0);
    lis.add_by_topic("application", "db_url", tx).unwrap();

    let start = Instant::now();
    lis.on_change(&db_url_changed());

    assert!(start.elapsed() >= timeout);
    assert!(lis.subscribers().find_by_topic("application", "db_url").is_empty());
}

#[test]
fn test_owner_closed_channel_is_removed() {
    let lis = listener(Duration::from_secs(2));
    let (tx, rx) = bounded(1);
    lis.add_by_topic("application", "db_url", tx).unwrap();

    drop(rx);
    lis.on_change(&db_url_changed());

    assert!(lis.subscribers().is_empty());
}

#[test]
fn test_reset_stops_all_delivery() {
    let lis = listener(Duration::from_secs(2));
    let (tx, rx) = unbounded();
    lis.add_by_topic("application", "db_url", tx.clone()).unwrap();
    lis.add_by_topic("application", "timeout", tx).unwrap();

    lis.reset();
    lis.on_change(
        &ChangeEvent::new("application")
            .with_change("db_url", ConfigChange::put(None, "a"))
            .with_change("timeout", ConfigChange::put(None, "30")),
    );

    assert!(drain(&rx).is_empty());
}

// --- Timeout isolation ---

#[test]
fn test_stuck_subscriber_does_not_starve_healthy_one() {
    let timeout = Duration::from_millis(100);
    let lis = listener(timeout);
    let (stuck_tx, _stuck_rx) = bounded(0);
    let (healthy_tx, healthy_rx) = unbounded();
    lis.add_by_topic("application", "", stuck_tx).unwrap();
    lis.add_by_topic("application", "", healthy_tx).unwrap();

    const N: usize = 5;
    let mut event = ChangeEvent::new("application");
    for i in 0..N {
        event = event.with_change(format!("k{}", i), ConfigChange::put(None, i.to_string()));
    }

    let start = Instant::now();
    lis.on_change(&event);

    // One timeout for the stuck subscriber, then it is gone
    assert!(start.elapsed() < timeout * 3);
    assert_eq!(drain(&healthy_rx).len(), N);
    assert_eq!(lis.subscribers().find_by_topic("application", "").len(), 1);
}

#[test]
fn test_slow_consumer_within_timeout_is_kept() {
    let lis = listener(Duration::from_secs(2));
    let (tx, rx) = bounded(0);
    lis.add_by_topic("application", "db_url", tx).unwrap();

    let consumer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        rx.recv_timeout(Duration::from_secs(2))
    });
    lis.on_change(&db_url_changed());

    assert!(consumer.join().unwrap().is_ok());
    assert_eq!(lis.subscribers().subscription_count(), 1);
}

#[test]
fn test_evicted_channel_reports_disconnect() {
    let lis = listener(Duration::from_millis(50));
    let (tx, rx) = bounded(0);
    lis.add_by_topic("application", "db_url", tx).unwrap();

    lis.on_change(&db_url_changed());

    assert_eq!(
        rx.recv_timeout(Duration::from_millis(200)),
        Err(RecvTimeoutError::Disconnected)
    );
}

// --- Store level ---

#[test]
fn test_memory_store_subscription_flow() {
    let store = memory_store();
    let (app_tx, app_rx) = unbounded();
    let (key_tx, key_rx) = unbounded();
    store.subscribe(&SubscribeRequest::default(), app_tx).unwrap();
    store
        .subscribe(
            &SubscribeRequest {
                group: "default".into(),
                keys: vec!["db_url".into()],
                ..Default::default()
            },
            key_tx,
        )
        .unwrap();

    store
        .set(&SetRequest {
            app_id: APP_ID.into(),
            items: vec![
                ConfigurationItem::new("default", "db_url", "mysql://a"),
                ConfigurationItem::new("default", "pool_size", "10"),
            ],
            ..Default::default()
        })
        .unwrap();

    assert_eq!(drain(&app_rx).len(), 2);
    let key_updates = drain(&key_rx);
    assert_eq!(key_updates.len(), 1);
    assert_eq!(key_updates[0].items[0].content, "mysql://a");

    store
        .delete(&DeleteRequest {
            app_id: APP_ID.into(),
            group: "default".into(),
            keys: vec!["db_url".into()],
            ..Default::default()
        })
        .unwrap();

    let deleted = drain(&key_rx);
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].items[0].content, "");
    assert_eq!(drain(&app_rx).len(), 1);

    store.stop_subscribe();
    assert!(store.listener().subscribers().is_empty());
}

#[test]
fn test_memory_store_isolates_groups() {
    let store = memory_store();
    let (tx, rx) = unbounded();
    store
        .subscribe(
            &SubscribeRequest {
                group: "g1".into(),
                keys: vec!["k".into()],
                ..Default::default()
            },
            tx,
        )
        .unwrap();

    store
        .set(&SetRequest {
            items: vec![ConfigurationItem::new("g2", "k", "v")],
            ..Default::default()
        })
        .unwrap();

    assert!(drain(&rx).is_empty());
}

#[test]
fn test_concurrent_subscribe_and_dispatch() {
    let lis = Arc::new(listener(Duration::from_secs(2)));
    let mut handles = Vec::new();
    let mut receivers = Vec::new();

    for i in 0..8 {
        let (tx, rx) = unbounded();
        receivers.push(rx);
        let lis = lis.clone();
        handles.push(thread::spawn(move || {
            lis.add_by_topic("application", "", tx).unwrap();
            lis.on_change(
                &ChangeEvent::new("application").with_change(format!("k{}", i), ConfigChange::put(None, "v")),
            );
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(lis.subscribers().subscription_count(), 8);
    // Every subscriber sees at least its own thread's change
    for rx in &receivers {
        assert!(!drain(rx).is_empty());
    }
}
