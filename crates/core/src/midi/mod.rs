//! Normalisation of raw MIDI messages into routed input events.
//!
//! Transport (device discovery, OS callbacks) stays outside this module; a
//! transport hands over the payload bytes, a timestamp and the device name.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{InputEvent, InputKind, InputMeta, RouterError, Result};

const NOTE_ON_STATUS: u8 = 144;
const DATA_MAX: f64 = 127.0;

/// Raw message as delivered by a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiMessage {
    pub data: Vec<u8>,
    /// Milliseconds, in the transport's time base.
    pub timestamp: f64,
    pub device: String,
}

impl MidiMessage {
    pub fn new(data: impl Into<Vec<u8>>, timestamp: f64, device: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            timestamp,
            device: device.into(),
        }
    }
}

/// Binding request produced while learn mode is armed.
#[derive(Debug, Clone, PartialEq)]
pub struct LearnedBinding {
    pub input_id: String,
    pub target_node_id: String,
    pub device_name: String,
}

/// What the engine should do with one MIDI message.
#[derive(Debug, Clone, PartialEq)]
pub enum MidiOutcome {
    Learned(LearnedBinding),
    Fired(InputEvent),
    ClockPulse,
    /// Malformed payload, or an external clock tick while the clock is
    /// generated internally.
    Ignored,
}

/// Stable input id of a note/control message.
pub fn input_id(status: u8, data1: u8) -> String {
    format!("midi_{status}{data1}")
}

/// Classifies `message`.
///
/// `learning` is the node waiting for a binding, if any. `clock_generated`
/// suppresses external clock ticks.
pub fn normalize(
    message: &MidiMessage,
    learning: Option<&str>,
    clock_generated: bool,
) -> MidiOutcome {
    match message.data.as_slice() {
        [_status] => {
            if clock_generated {
                MidiOutcome::Ignored
            } else {
                MidiOutcome::ClockPulse
            }
        }
        [status, data1, data2, ..] => {
            let id = input_id(*status, *data1);
            if let Some(target) = learning {
                return MidiOutcome::Learned(LearnedBinding {
                    input_id: id,
                    target_node_id: target.to_string(),
                    device_name: message.device.clone(),
                });
            }

            let note_on = *status == NOTE_ON_STATUS && *data2 != 0;
            MidiOutcome::Fired(InputEvent {
                input_id: id,
                value: Some(f64::from(*data2) / DATA_MAX),
                metadata: InputMeta {
                    kind: Some(InputKind::Midi),
                    note_on: Some(note_on),
                },
            })
        }
        _ => MidiOutcome::Ignored,
    }
}

/// Last message seen from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiRecord {
    pub data: Vec<u8>,
    pub timestamp: f64,
}

/// Setup-time description of an input device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MidiDevice {
    pub title: String,
    pub id: String,
    pub manufacturer: String,
    pub bank_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MidiRecord>,
}

/// Devices keyed by name.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DeviceTable {
    devices: HashMap<String, MidiDevice>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        manufacturer: impl Into<String>,
        bank_index: usize,
    ) {
        let name = name.into();
        self.devices.insert(
            name.clone(),
            MidiDevice {
                title: name.clone(),
                id: name,
                manufacturer: manufacturer.into(),
                bank_index,
                last_message: None,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&MidiDevice> {
        self.devices.get(name)
    }

    pub fn set_bank(&mut self, name: &str, bank_index: usize) -> Result<()> {
        let device = self
            .devices
            .get_mut(name)
            .ok_or_else(|| RouterError::msg(format!("unknown MIDI device `{name}`")))?;
        device.bank_index = bank_index;
        Ok(())
    }

    /// Stores `message` as the device's latest. Unregistered devices are
    /// left untouched.
    pub fn record(&mut self, message: &MidiMessage) {
        if let Some(device) = self.devices.get_mut(&message.device) {
            device.last_message = Some(MidiRecord {
                data: message.data.clone(),
                timestamp: message.timestamp,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
