//! Per-connection session state.

use std::collections::{BTreeMap, BTreeSet};

use switchboard_types::Value;

/// Key/value scratch space and topic subscriptions of one connection.
/// Dropped with the connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    values: BTreeMap<String, Value>,
    topics: BTreeSet<String>,
}

impl Session {
    /// Read a session value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Write a session value. Writing `null` removes the key.
    pub fn set(&mut self, key: &str, value: Value) {
        if value.is_null() {
            self.values.remove(key);
        } else {
            self.values.insert(key.to_owned(), value);
        }
    }

    /// Record a subscription. Returns `false` if already subscribed.
    pub fn subscribe(&mut self, topic: &str) -> bool {
        self.topics.insert(topic.to_owned())
    }

    /// Drop a subscription. Returns `false` if not subscribed.
    pub fn unsubscribe(&mut self, topic: &str) -> bool {
        self.topics.remove(topic)
    }

    /// Subscribed topics.
    pub const fn topics(&self) -> &BTreeSet<String> {
        &self.topics
    }
}
