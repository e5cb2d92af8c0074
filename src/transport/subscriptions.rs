use std::collections::HashMap;

use serde_json::Value;

/// Invoked on the transport worker for every matching notification.
/// Handlers must not block; anything slow is handed off to an executor.
pub(crate) type NotificationHandler = Box<dyn FnMut(&[Value]) + Send>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SubKey {
    method: String,
    key: String,
}

/// Server-push subscriptions for one connection run, keyed by
/// `(method, first-param)` so a single entry can be removed explicitly.
/// Entries that are never unsubscribed live until the run terminates.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: HashMap<SubKey, NotificationHandler>,
}

impl SubscriptionRegistry {
    pub(crate) fn insert(&mut self, method: &str, key: String, handler: NotificationHandler) {
        let sub = SubKey { method: method.to_string(), key };
        self.entries.insert(sub, handler);
    }

    pub(crate) fn remove(&mut self, method: &str, key: &str) -> bool {
        let sub = SubKey { method: method.to_string(), key: key.to_string() };
        self.entries.remove(&sub).is_some()
    }

    /// Exact match on `(method, params[0])`. Returns false when no handler
    /// is registered for the notification.
    pub(crate) fn dispatch(&mut self, method: &str, params: &[Value]) -> bool {
        let Some(key) = params.first().and_then(Value::as_str) else {
            return false;
        };
        let sub = SubKey { method: method.to_string(), key: key.to_string() };
        match self.entries.get_mut(&sub) {
            Some(handler) => {
                handler(params);
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
