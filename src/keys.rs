//! Key and label encoding.
//!
//! Stores that support labels fold them into the key they index and
//! notify under, as `key{delimiter}label`.

/// Default delimiter between a key and its label.
pub const DEFAULT_DELIMITER: &str = "@$";

/// Joins and splits `key{delimiter}label` strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyCodec {
    delimiter: String,
}

impl KeyCodec {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }

    /// `key` alone when there is no label.
    pub fn concatenate_key(&self, key: &str, label: &str) -> String {
        if label.is_empty() {
            return key.to_string();
        }
        format!("{}{}{}", key, self.delimiter, label)
    }

    /// Key under which an item's tags are kept in the tag namespace.
    pub fn concatenate_key_for_tag(&self, group: &str, key_with_label: &str) -> String {
        if key_with_label.is_empty() {
            return String::new();
        }
        format!("{}{}{}", group, self.delimiter, key_with_label)
    }

    /// Split into `(key, label)`. Anything after a second delimiter is dropped.
    pub fn split_key(&self, key_with_label: &str) -> (String, String) {
        if key_with_label.is_empty() {
            return (String::new(), String::new());
        }
        let mut parts = key_with_label.split(self.delimiter.as_str());
        let key = parts.next().unwrap_or_default().to_string();
        let label = parts.next().unwrap_or_default().to_string();
        (key, label)
    }
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER)
    }
}
