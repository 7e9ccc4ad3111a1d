//! The store surface every backend implements, and the subscribe-request
//! expansion they share.

use crossbeam_channel::Sender;
use tracing::debug;

use crate::error::Result;
use crate::keys::KeyCodec;
use crate::subscriptions::{ChangeListener, TopicKey};
use crate::types::{
    ConfigurationItem, DeleteRequest, GetRequest, Notification, SetRequest, SubscribeRequest,
};

/// A configuration store backend.
///
/// Stores are built ready to use by their own constructors; there is no
/// separate init step.
pub trait ConfigStore: Send + Sync {
    /// Read items at app, group or key level.
    fn get(&self, req: &GetRequest) -> Result<Vec<ConfigurationItem>>;

    fn set(&self, req: &SetRequest) -> Result<()>;

    fn delete(&self, req: &DeleteRequest) -> Result<()>;

    /// Register `sender` for changes matching `req`.
    ///
    /// The store does not send the current values; only later changes are
    /// delivered.
    fn subscribe(&self, req: &SubscribeRequest, sender: Sender<Notification>) -> Result<()>;

    /// Drop every subscription of this store.
    ///
    /// Must run before the owner closes its receivers.
    fn stop_subscribe(&self);

    fn default_group(&self) -> &str;

    fn default_label(&self) -> &str;

    fn store_name(&self) -> &str;

    fn app_id(&self) -> &str;
}

/// Topics a subscribe request maps to.
///
/// - keys without a group fall back to `default_group`
/// - no group and no keys: one group-level topic per namespace, skipping
///   empty names
/// - group without keys: the group-level topic
/// - keys: one topic per key, with the request label folded in
pub fn expand_subscription(
    req: &SubscribeRequest,
    default_group: &str,
    namespaces: &[String],
    codec: &KeyCodec,
) -> Vec<TopicKey> {
    let group = if req.group.is_empty() && !req.keys.is_empty() {
        default_group
    } else {
        req.group.as_str()
    };

    if group.is_empty() {
        return namespaces
            .iter()
            .filter(|ns| !ns.is_empty())
            .map(TopicKey::group_level)
            .collect();
    }

    if req.keys.is_empty() {
        return vec![TopicKey::group_level(group)];
    }

    req.keys
        .iter()
        .map(|key| TopicKey::new(group, codec.concatenate_key(key, &req.label)))
        .collect()
}

/// Register `sender` under every topic. Stops at the first failure.
pub fn register_topics(
    listener: &ChangeListener,
    topics: &[TopicKey],
    sender: &Sender<Notification>,
) -> Result<()> {
    for topic in topics {
        listener.add_by_topic(&topic.group, &topic.key_with_label, sender.clone())?;
    }
    debug!(topics = topics.len(), "subscribe request registered");
    Ok(())
}

/// Split a comma-separated namespace list, dropping blanks.
pub fn parse_namespaces(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(group: &str, keys: &[&str], label: &str) -> SubscribeRequest {
        SubscribeRequest {
            app_id: "app".into(),
            group: group.into(),
            label: label.into(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_app_level_expands_namespaces() {
        let namespaces = vec!["application".to_string(), String::new(), "dubbo".to_string()];
        let topics = expand_subscription(
            &request("", &[], ""),
            "application",
            &namespaces,
            &KeyCodec::default(),
        );

        assert_eq!(
            topics,
            vec![
                TopicKey::group_level("application"),
                TopicKey::group_level("dubbo")
            ]
        );
    }

    #[test]
    fn test_group_level() {
        let topics = expand_subscription(&request("dubbo", &[], "x"), "application", &[], &KeyCodec::default());
        assert_eq!(topics, vec![TopicKey::group_level("dubbo")]);
    }

    #[test]
    fn test_key_level_defaults_group_and_folds_label() {
        let topics = expand_subscription(
            &request("", &["db_url", "timeout"], "gray"),
            "application",
            &[],
            &KeyCodec::default(),
        );

        assert_eq!(
            topics,
            vec![
                TopicKey::new("application", "db_url@$gray"),
                TopicKey::new("application", "timeout@$gray"),
            ]
        );
    }

    #[test]
    fn test_parse_namespaces() {
        assert_eq!(
            parse_namespaces("application, dubbo,,"),
            vec!["application".to_string(), "dubbo".to_string()]
        );
        assert!(parse_namespaces("").is_empty());
    }
}
