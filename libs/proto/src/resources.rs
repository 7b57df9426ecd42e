//! Resources, attributes and offers.

use serde::{Deserialize, Serialize};

use crate::{AgentId, FrameworkId, OfferId};

/// Well-known resource names.
pub mod resource_names {
    pub const CPUS: &str = "cpus";
    pub const MEM: &str = "mem";
    pub const DISK: &str = "disk";
    pub const PORTS: &str = "ports";
}

/// Kind of value carried by a resource or attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Scalar,
    Ranges,
    Set,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scalar {
    pub value: f64,
}

/// Inclusive range `[begin, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub begin: u64,
    pub end: u64,
}

impl Range {
    /// Number of values in the range.
    pub fn len(&self) -> u64 {
        if self.end < self.begin {
            0
        } else {
            self.end - self.begin + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranges {
    #[serde(default)]
    pub range: Vec<Range>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSet {
    #[serde(default)]
    pub item: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Text {
    pub value: String,
}

/// A quantity of one named resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Ranges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<ValueSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Resource {
    pub fn scalar(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value_type: ValueType::Scalar,
            scalar: Some(Scalar { value }),
            ranges: None,
            set: None,
            role: None,
        }
    }

    pub fn ranges(name: &str, range: Vec<Range>) -> Self {
        Self {
            name: name.to_string(),
            value_type: ValueType::Ranges,
            scalar: None,
            ranges: Some(Ranges { range }),
            set: None,
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// Agent attribute advertised with an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Ranges>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<ValueSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Text>,
}

impl Attribute {
    pub fn text(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value_type: ValueType::Text,
            scalar: None,
            ranges: None,
            set: None,
            text: Some(Text {
                value: value.to_string(),
            }),
        }
    }

    /// Renders the attribute value as a string for constraint matching.
    ///
    /// Ranges and sets have no single textual value and yield `None`.
    pub fn value_string(&self) -> Option<String> {
        match self.value_type {
            ValueType::Text => self.text.as_ref().map(|t| t.value.clone()),
            ValueType::Scalar => self.scalar.map(|s| s.value.to_string()),
            ValueType::Ranges | ValueType::Set => None,
        }
    }
}

/// A time-boxed grant of resources on one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub framework_id: FrameworkId,
    pub agent_id: AgentId,
    pub hostname: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl Offer {
    /// Sum of all scalar resources with the given name, across roles.
    pub fn scalar(&self, name: &str) -> f64 {
        self.resources
            .iter()
            .filter(|r| r.name == name)
            .filter_map(|r| r.scalar.map(|s| s.value))
            .sum()
    }

    /// All ranges offered under the given name.
    pub fn ranges(&self, name: &str) -> Vec<Range> {
        self.resources
            .iter()
            .filter(|r| r.name == name)
            .filter_map(|r| r.ranges.as_ref())
            .flat_map(|r| r.range.iter().copied())
            .collect()
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer_json() -> serde_json::Value {
        serde_json::json!({
            "id": {"value": "offer-1"},
            "framework_id": {"value": "fw-1"},
            "agent_id": {"value": "agent-1"},
            "hostname": "node-a",
            "resources": [
                {"name": "cpus", "type": "SCALAR", "scalar": {"value": 2.0}, "role": "*"},
                {"name": "cpus", "type": "SCALAR", "scalar": {"value": 0.5}, "role": "web"},
                {"name": "mem", "type": "SCALAR", "scalar": {"value": 1024.0}},
                {"name": "ports", "type": "RANGES", "ranges": {"range": [{"begin": 31000, "end": 31009}]}}
            ],
            "attributes": [
                {"name": "rack", "type": "TEXT", "text": {"value": "r1"}}
            ]
        })
    }

    #[test]
    fn test_offer_scalar_sums_roles() {
        let offer: Offer = serde_json::from_value(offer_json()).unwrap();
        assert_eq!(offer.scalar("cpus"), 2.5);
        assert_eq!(offer.scalar("mem"), 1024.0);
        assert_eq!(offer.scalar("disk"), 0.0);
    }

    #[test]
    fn test_offer_ranges_and_attributes() {
        let offer: Offer = serde_json::from_value(offer_json()).unwrap();
        let ports = offer.ranges("ports");
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].len(), 10);
        assert_eq!(
            offer.attribute("rack").and_then(Attribute::value_string),
            Some("r1".to_string())
        );
    }

    #[test]
    fn test_resource_serializes_type_tag() {
        let json = serde_json::to_value(Resource::scalar("mem", 64.0)).unwrap();
        assert_eq!(json["type"], "SCALAR");
        assert!(json.get("ranges").is_none());
    }

    #[test]
    fn test_inverted_range_is_empty() {
        assert!(Range { begin: 10, end: 9 }.is_empty());
    }
}
