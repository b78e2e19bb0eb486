use serde::{Deserialize, Serialize};

use crate::{nodes::NodeValue, InputKind};

/// Event published to the rendering engine and other collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum OutboundEvent {
    #[serde(rename_all = "camelCase")]
    NodeValueUpdated { node_id: String, value: NodeValue },
    #[serde(rename_all = "camelCase")]
    ShotFired { sketch_id: String, method: String },
    #[serde(rename_all = "camelCase")]
    ShotArmed { node_id: String },
    #[serde(rename_all = "camelCase")]
    ShotDisarmed { node_id: String },
    ClockBeatIncremented,
    ClockBpmUpdated { bpm: u32 },
    #[serde(rename_all = "camelCase")]
    InputLinkCreated {
        link_id: String,
        input_id: String,
        target_node_id: String,
        source_type: InputKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_name: Option<String>,
    },
    ProjectError { message: String },
}

/// Ordered buffer of events produced while handling commands.
#[derive(Debug, Default, Clone)]
pub struct Outbox {
    events: Vec<OutboundEvent>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[OutboundEvent] {
        &self.events
    }

    pub fn push(&mut self, event: OutboundEvent) {
        self.events.push(event);
    }

    pub fn node_value(&mut self, node_id: &str, value: NodeValue) {
        self.push(OutboundEvent::NodeValueUpdated {
            node_id: node_id.to_string(),
            value,
        });
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(OutboundEvent::ProjectError {
            message: message.into(),
        });
    }

    /// Takes every buffered event, leaving the outbox empty.
    pub fn drain(&mut self) -> Vec<OutboundEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
