//! Change subscriptions shared by every configuration store.
//!
//! Subscribers are indexed by topic, `(group, keyWithLabel)`. A topic with
//! an empty key is group-level and matches every key of the group. Backend
//! adapters translate their native change events into a [`ChangeEvent`]
//! and hand it to [`ChangeListener::on_change`], which notifies the
//! group-level and key-level subscribers of every changed key.
//!
//! Delivery is bounded: a subscriber that does not accept a notification
//! within the response timeout is evicted and its channel closed.
//!
//! # Example
//!
//! ```ignore
//! let listener = ChangeListener::new(store_accessor);
//! let (tx, rx) = crossbeam_channel::bounded(16);
//!
//! // Whole group, and one key of it
//! listener.add_by_topic("application", "", tx.clone())?;
//! listener.add_by_topic("application", "db_url", tx)?;
//!
//! // Backend side
//! listener.on_change(&ChangeEvent::new("application")
//!     .with_change("db_url", ConfigChange::put(Some("old".into()), "new")));
//!
//! while let Ok(notification) = rx.recv() {
//!     println!("{:?}", notification.items);
//! }
//! ```
//!
//! [`ChangeEvent`]: crate::types::ChangeEvent

mod listener;
mod registry;
mod types;

pub use listener::{ChangeListener, ListenerStore};
pub use registry::SubscriberRegistry;
pub use types::{DeliveryOutcome, ListenerConfig, Subscription, TopicKey};
