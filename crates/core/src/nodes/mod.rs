use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{modifiers::ModifierSpec, RouterError, Result};

/// Value held by a node. Select options carry text, everything else numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeValue {
    Number(f64),
    Text(String),
}

impl NodeValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Text(text) => Some(text),
        }
    }
}

impl Default for NodeValue {
    fn default() -> Self {
        Self::Number(0.0)
    }
}

impl From<f64> for NodeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for NodeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// One discrete choice of a select node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: NodeValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl SelectOption {
    pub fn new(value: impl Into<NodeValue>) -> Self {
        Self {
            value: value.into(),
            label: None,
        }
    }
}

/// Behaviour-specific part of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeKind {
    Value,
    Select {
        options: Vec<SelectOption>,
    },
    #[serde(rename_all = "camelCase")]
    Shot {
        sketch_id: String,
        method: String,
        #[serde(default)]
        armed: bool,
    },
    #[serde(rename_all = "camelCase")]
    LfoDriven {
        lfo_option_ids: Vec<String>,
    },
    /// Supplies `shape` or `rate` to an LFO-driven node.
    LfoOption {
        key: String,
    },
    Modifier(ModifierSpec),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Value => NodeType::Value,
            Self::Select { .. } => NodeType::Select,
            Self::Shot { .. } => NodeType::Shot,
            Self::LfoDriven { .. } => NodeType::LfoDriven,
            Self::LfoOption { .. } => NodeType::LfoOption,
            Self::Modifier(_) => NodeType::Modifier,
        }
    }
}

/// Data-free tag of [`NodeKind`], carried by input links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    Value,
    Select,
    Shot,
    LfoDriven,
    LfoOption,
    Modifier,
}

/// A controllable parameter or trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub value: NodeValue,
    #[serde(default)]
    pub modifier_ids: Vec<String>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            value: NodeValue::default(),
            modifier_ids: Vec::new(),
            kind,
        }
    }

    pub fn value(id: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Value)
    }

    pub fn with_value(mut self, value: impl Into<NodeValue>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_modifiers<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modifier_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }
}

/// Owner of every node addressed by id.
#[derive(Debug, Default, Clone)]
pub struct NodeTable {
    nodes: HashMap<String, Node>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Inserts a node, returning the one it replaced.
    pub fn insert(&mut self, node: Node) -> Option<Node> {
        self.nodes.insert(node.id.clone(), node)
    }

    pub fn remove(&mut self, id: &str) -> Option<Node> {
        self.nodes.remove(id)
    }

    pub fn get(&self, id: &str) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| RouterError::NodeNotFound(id.to_string()))
    }

    /// Resolves every id in order. Fails on the first missing one.
    pub fn get_many<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<&Node>> {
        ids.iter().map(|id| self.get(id.as_ref())).collect()
    }

    pub fn set_value(&mut self, id: &str, value: NodeValue) -> Result<()> {
        self.get_mut(id)?.value = value;
        Ok(())
    }

    /// Updates the armed flag of a shot node.
    pub fn set_armed(&mut self, id: &str, armed: bool) -> Result<()> {
        match &mut self.get_mut(id)?.kind {
            NodeKind::Shot { armed: slot, .. } => {
                *slot = armed;
                Ok(())
            }
            _ => Err(RouterError::msg(format!("node `{id}` is not a shot"))),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| RouterError::NodeNotFound(id.to_string()))
    }
}

impl FromIterator<Node> for NodeTable {
    fn from_iter<T: IntoIterator<Item = Node>>(iter: T) -> Self {
        let mut table = Self::new();
        for node in iter {
            table.insert(node);
        }
        table
    }
}
