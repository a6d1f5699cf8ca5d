use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A named value aggregated across the spans of a trace. Equal properties
/// collapse when collected into the completion-time event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: String,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Derived end-to-end latency and metadata for a trace, emitted once the
/// trace is considered quiescent. Identity fields describe the root span;
/// duration and properties cover the whole trace snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionTime {
    pub id: String,
    pub timestamp_ms: i64,
    pub duration_ms: i64,
    pub operation: String,
    #[serde(default)]
    pub fault: Option<String>,
    #[serde(default)]
    pub host_address: Option<String>,
    #[serde(default)]
    pub endpoint_type: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub properties: BTreeSet<Property>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_properties_collapse() {
        let mut set = BTreeSet::new();
        set.insert(Property::new("region", "eu-1"));
        set.insert(Property::new("region", "eu-1"));
        set.insert(Property::new("region", "eu-2"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn serializes_properties_as_array() {
        let event = CompletionTime {
            id: "root".into(),
            timestamp_ms: 10,
            duration_ms: 25,
            operation: "GET /v1/orders".into(),
            fault: None,
            host_address: None,
            endpoint_type: Some("HTTP".into()),
            uri: Some("/v1/orders".into()),
            properties: [Property::new("service", "orders")].into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["properties"].is_array());
        assert_eq!(json["fault"], serde_json::Value::Null);
    }
}
