use crate::core::error::{FlowError, Result};
use crate::core::message::NodeValue;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// The definition a [`Unit`](crate::Unit) is built from.
///
/// Deserializes from the usual flow-file shape:
///
/// ```json
/// {"id": "n1", "type": "inject", "name": "tick", "wires": [["n2", "n3"], "n4", null]}
/// ```
///
/// Each port may be a list of target ids, a bare id, or `null` for an
/// unconnected port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub unit_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_wires")]
    pub wires: Vec<Vec<String>>,
}

impl UnitConfig {
    pub fn new(id: impl Into<String>, unit_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            unit_type: unit_type.into(),
            name: None,
            wires: Vec::new(),
        }
    }

    /// A definition with a generated id, for units built in code.
    pub fn anonymous(unit_type: impl Into<String>) -> Self {
        let id = format!("autogen_{}", uuid::Uuid::new_v4().simple());
        log::warn!(
            "Auto-generated unit id '{}'. Wires referring to this unit must use it verbatim.",
            id
        );
        Self::new(id, unit_type)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replaces the whole wiring table.
    pub fn with_wires<P, T>(mut self, wires: impl IntoIterator<Item = P>) -> Self
    where
        P: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.wires = wires
            .into_iter()
            .map(|port| port.into_iter().map(Into::into).collect())
            .collect();
        self
    }

    /// Appends one output port wired to `targets`.
    pub fn with_port<T: Into<String>>(mut self, targets: impl IntoIterator<Item = T>) -> Self {
        self.wires.push(targets.into_iter().map(Into::into).collect());
        self
    }

    /// Parses a definition from a JSON value.
    pub fn from_json(value: NodeValue) -> Result<Self> {
        let config: UnitConfig = serde_json::from_value(value)?;
        config.validate()
    }

    fn validate(self) -> Result<Self> {
        if self.id.trim().is_empty() {
            return Err(FlowError::InvalidDefinition(
                "unit id must not be empty".to_string(),
            ));
        }
        if self.unit_type.trim().is_empty() {
            return Err(FlowError::InvalidDefinition(format!(
                "unit {} has an empty type",
                self.id
            )));
        }
        Ok(self)
    }
}

impl FromStr for UnitConfig {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        let config: UnitConfig = serde_json::from_str(s)?;
        config.validate()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortDefinition {
    Target(String),
    Targets(Vec<String>),
}

fn deserialize_wires<'de, D>(deserializer: D) -> std::result::Result<Vec<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let ports: Option<Vec<Option<PortDefinition>>> = Option::deserialize(deserializer)?;
    Ok(ports
        .unwrap_or_default()
        .into_iter()
        .map(|port| match port {
            Some(PortDefinition::Target(id)) => vec![id],
            Some(PortDefinition::Targets(ids)) => ids,
            None => Vec::new(),
        })
        .collect())
}
