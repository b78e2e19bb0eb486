use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    modifiers::THRESHOLD_KEY,
    nodes::{Node, NodeKind, NodeTable, NodeType},
    RouterError, Result,
};

/// Identifier of the synthetic input carrying the clock phase.
pub const LFO_INPUT_ID: &str = "lfo";

/// Source kind of an input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputKind {
    Audio,
    Midi,
    Lfo,
    NoteOn,
}

impl InputKind {
    /// Whether an input of this kind passes a modifier filtered on `filter`.
    /// Note-on messages are MIDI messages.
    pub fn satisfies(self, filter: InputKind) -> bool {
        self == filter || (self == InputKind::NoteOn && filter == InputKind::Midi)
    }
}

/// Metadata attached to an input event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputMeta {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<InputKind>,
    #[serde(rename = "noteOn", default, skip_serializing_if = "Option::is_none")]
    pub note_on: Option<bool>,
}

impl InputMeta {
    pub fn of(kind: InputKind) -> Self {
        Self {
            kind: Some(kind),
            note_on: None,
        }
    }

    /// Kind used for routing: a MIDI message flagged as note-on routes as
    /// [`InputKind::NoteOn`].
    pub fn effective_kind(&self) -> Option<InputKind> {
        match (self.kind, self.note_on) {
            (Some(InputKind::Midi), Some(true)) => Some(InputKind::NoteOn),
            (kind, _) => kind,
        }
    }
}

/// Inbound "input fired" event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEvent {
    pub input_id: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub metadata: InputMeta,
}

impl InputEvent {
    pub fn new(input_id: impl Into<String>, value: f64, metadata: InputMeta) -> Self {
        Self {
            input_id: input_id.into(),
            value: Some(value),
            metadata,
        }
    }
}

/// Last observed state of an input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub id: String,
    pub value: Option<f64>,
    pub kind: Option<InputKind>,
}

/// Every input observed since start-up.
#[derive(Debug, Default, Clone)]
pub struct InputTable {
    inputs: HashMap<String, Input>,
}

impl InputTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `event`, creating the input on first sight.
    pub fn observe(&mut self, event: &InputEvent) {
        let input = self
            .inputs
            .entry(event.input_id.clone())
            .or_insert_with(|| Input {
                id: event.input_id.clone(),
                value: None,
                kind: None,
            });
        input.value = event.value;
        if event.metadata.kind.is_some() {
            input.kind = event.metadata.kind;
        }
    }

    pub fn get(&self, id: &str) -> Option<&Input> {
        self.inputs.get(id)
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Binding from one input to one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputLink {
    pub id: String,
    pub input_id: String,
    pub node_id: String,
    pub node_type: NodeType,
    pub source: InputKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

impl InputLink {
    /// Modifier ids of `node` that apply to an input of `kind` arriving
    /// through this link.
    ///
    /// Shots fed by audio use every modifier except thresholds and use none
    /// for other kinds. Other nodes keep the modifiers whose filter admits
    /// `kind`.
    pub fn active_modifier_ids<'a>(
        &self,
        node: &'a Node,
        nodes: &NodeTable,
        kind: Option<InputKind>,
    ) -> Result<Vec<&'a str>> {
        let mut active = Vec::new();
        if let NodeKind::Shot { .. } = node.kind {
            if kind != Some(InputKind::Audio) {
                return Ok(active);
            }
        }

        for id in &node.modifier_ids {
            let spec = match &nodes.get(id)?.kind {
                NodeKind::Modifier(spec) => spec,
                _ => {
                    return Err(RouterError::InvalidLink {
                        input_id: self.input_id.clone(),
                        node_id: node.id.clone(),
                        reason: format!("`{id}` is not a modifier"),
                    })
                }
            };
            let keep = match node.kind {
                NodeKind::Shot { .. } => spec.key != THRESHOLD_KEY,
                _ => spec.accepts(kind),
            };
            if keep {
                active.push(id.as_str());
            }
        }
        Ok(active)
    }
}

/// Ordered set of input links.
#[derive(Debug, Default, Clone)]
pub struct LinkTable {
    links: Vec<InputLink>,
    next_id: u64,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a link, or refreshes the source of an existing one between the
    /// same input and node.
    pub fn create(
        &mut self,
        input_id: impl Into<String>,
        node_id: impl Into<String>,
        node_type: NodeType,
        source: InputKind,
        device_name: Option<String>,
    ) -> &InputLink {
        let input_id = input_id.into();
        let node_id = node_id.into();

        if let Some(index) = self
            .links
            .iter()
            .position(|link| link.input_id == input_id && link.node_id == node_id)
        {
            let link = &mut self.links[index];
            link.node_type = node_type;
            link.source = source;
            link.device_name = device_name;
            return &self.links[index];
        }

        self.next_id += 1;
        self.links.push(InputLink {
            id: format!("link_{}", self.next_id),
            input_id,
            node_id,
            node_type,
            source,
            device_name,
        });
        &self.links[self.links.len() - 1]
    }

    pub fn delete(&mut self, link_id: &str) -> Result<InputLink> {
        let index = self
            .links
            .iter()
            .position(|link| link.id == link_id)
            .ok_or_else(|| RouterError::msg(format!("input link `{link_id}` does not exist")))?;
        Ok(self.links.remove(index))
    }

    /// Drops every link targeting `node_id`, returning how many were removed.
    pub fn delete_for_node(&mut self, node_id: &str) -> usize {
        let before = self.links.len();
        self.links.retain(|link| link.node_id != node_id);
        before - self.links.len()
    }

    pub fn replace_all(&mut self, links: Vec<InputLink>) {
        self.next_id = links
            .iter()
            .filter_map(|link| link.id.strip_prefix("link_")?.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        self.links = links;
    }

    /// Links driven by `input_id`, in creation order.
    pub fn bound_to<'a>(&'a self, input_id: &'a str) -> impl Iterator<Item = &'a InputLink> + 'a {
        self.links.iter().filter(move |link| link.input_id == input_id)
    }

    pub fn get(&self, link_id: &str) -> Option<&InputLink> {
        self.links.iter().find(|link| link.id == link_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputLink> {
        self.links.iter()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
