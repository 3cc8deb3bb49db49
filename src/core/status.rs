use crate::core::message::NodeValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A status descriptor. Shared by reference all the way to the bus.
pub type Status = Arc<NodeValue>;

pub const STATUS_TOPIC_PREFIX: &str = "status/";

/// The topic a unit's status is published under.
pub fn status_topic(unit_id: &str) -> String {
    format!("{}{}", STATUS_TOPIC_PREFIX, unit_id)
}

/// The publish side of the pub/sub bus that carries unit status.
pub trait StatusBus: Send + Sync {
    fn publish(&self, topic: &str, payload: Status, retain: bool);
}

/// One recorded call to [`StatusBus::publish`].
#[derive(Debug, Clone)]
pub struct Publication {
    pub topic: String,
    pub payload: Status,
    pub retain: bool,
}

/// Simple in-memory bus: keeps every publication and the last retained
/// payload per topic.
#[derive(Debug, Default)]
pub struct MemoryBus {
    retained: Mutex<HashMap<String, Status>>,
    published: Mutex<Vec<Publication>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last retained payload on `topic`, as a late subscriber would see it.
    pub fn retained(&self, topic: &str) -> Option<Status> {
        self.retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
    }

    pub fn publications(&self) -> Vec<Publication> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StatusBus for MemoryBus {
    fn publish(&self, topic: &str, payload: Status, retain: bool) {
        if retain {
            self.retained
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(topic.to_string(), payload.clone());
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Publication {
                topic: topic.to_string(),
                payload,
                retain,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_topic() {
        assert_eq!(status_topic("123"), "status/123");
    }

    #[test]
    fn test_memory_bus_retains_last_payload() {
        let bus = MemoryBus::new();
        let first: Status = Arc::new(json!({"text": "connecting"}));
        let second: Status = Arc::new(json!({"text": "connected"}));

        bus.publish("status/1", first, true);
        bus.publish("status/1", second.clone(), true);
        bus.publish("status/1", Arc::new(json!({"text": "ephemeral"})), false);

        let retained = bus.retained("status/1").unwrap();
        assert!(Arc::ptr_eq(&retained, &second));
        assert_eq!(bus.publications().len(), 3);
        assert!(bus.retained("status/2").is_none());
    }
}
