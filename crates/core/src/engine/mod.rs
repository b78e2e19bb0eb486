//! Single-writer owner of all routing state.
//!
//! Producers (MIDI transports, the clock ticker, audio capture, the UI) send
//! [`Command`]s through an [`EngineHandle`]. [`Engine::run`] processes them
//! strictly in arrival order, so node and clock state never see concurrent
//! mutation.

use std::{
    path::Path,
    thread::{self, JoinHandle},
    time::Instant,
};

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    clock::{pulse_interval, ClockGenerator},
    events::{OutboundEvent, Outbox},
    inputs::LFO_INPUT_ID,
    midi::{self, DeviceTable, LearnedBinding, MidiMessage, MidiOutcome},
    modifiers::{ModifierRegistry, ModifierWork},
    nodes::{Node, NodeTable},
    AppConfig, AudioAnalyser, InputEvent, InputKind, InputLink, InputMeta, InputRouter,
    InputTable, LinkTable, RouterError, Result,
};

/// Work item processed by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    InputFired(InputEvent),
    Midi(MidiMessage),
    ClockPulse,
    ClockReset,
    SetClockGenerated(bool),
    StartLearning(String),
    CancelLearning,
    LinkCreate {
        input_id: String,
        node_id: String,
        source: InputKind,
        device_name: Option<String>,
    },
    LinkDelete(String),
    /// Drops a node together with every link targeting it.
    NodeRemove(String),
    DeviceConnected { name: String, manufacturer: String },
    DeviceBank { name: String, bank_index: usize },
    AudioBlock(Vec<f32>),
}

/// Nodes and links handed over by the project store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSnapshot {
    pub nodes: Vec<Node>,
    pub links: Vec<InputLink>,
}

impl ProjectSnapshot {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

/// Cloneable sending side of the engine queue.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    sender: Sender<Command>,
}

impl EngineHandle {
    pub fn send(&self, command: Command) -> Result<()> {
        self.sender
            .send(command)
            .map_err(|_| RouterError::QueueClosed)
    }

    pub fn fire(&self, input_id: impl Into<String>, value: f64, metadata: InputMeta) -> Result<()> {
        self.send(Command::InputFired(InputEvent::new(input_id, value, metadata)))
    }
}

/// Creates an unbounded command queue.
pub fn command_queue() -> (EngineHandle, Receiver<Command>) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (EngineHandle { sender }, receiver)
}

/// Routing state plus the components that mutate it.
#[derive(Debug)]
pub struct Engine<W = ModifierRegistry> {
    router: InputRouter<W>,
    clock: ClockGenerator,
    clock_generated: bool,
    nodes: NodeTable,
    links: LinkTable,
    inputs: InputTable,
    devices: DeviceTable,
    learning: Option<String>,
    analyser: AudioAnalyser,
    default_bank: usize,
    outbox: Outbox,
}

impl Engine<ModifierRegistry> {
    /// Engine using the built-in modifier transforms.
    pub fn new(config: &AppConfig) -> Self {
        Self::with_work(config, ModifierRegistry::with_builtins())
    }
}

impl<W: ModifierWork> Engine<W> {
    pub fn with_work(config: &AppConfig, work: W) -> Self {
        Self {
            router: InputRouter::new(work),
            clock: ClockGenerator::new(),
            clock_generated: config.clock.generated,
            nodes: NodeTable::new(),
            links: LinkTable::new(),
            inputs: InputTable::new(),
            devices: DeviceTable::new(),
            learning: None,
            analyser: AudioAnalyser::new(&config.audio),
            default_bank: config.midi.default_bank,
            outbox: Outbox::new(),
        }
    }

    /// Replaces nodes and links with the contents of `project`.
    pub fn load_project(&mut self, project: ProjectSnapshot) {
        self.nodes = project.nodes.into_iter().collect();
        self.links.replace_all(project.links);
        self.learning = None;
        info!(
            nodes = self.nodes.len(),
            links = self.links.len(),
            "project loaded"
        );
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut NodeTable {
        &mut self.nodes
    }

    pub fn links(&self) -> &LinkTable {
        &self.links
    }

    pub fn inputs(&self) -> &InputTable {
        &self.inputs
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    pub fn clock(&self) -> &ClockGenerator {
        &self.clock
    }

    pub fn is_clock_generated(&self) -> bool {
        self.clock_generated
    }

    /// Node currently waiting for a learned binding.
    pub fn learning(&self) -> Option<&str> {
        self.learning.as_deref()
    }

    /// Processes one command and returns the events it produced. Failures
    /// become a trailing [`OutboundEvent::ProjectError`].
    pub fn dispatch(&mut self, command: Command) -> Vec<OutboundEvent> {
        self.dispatch_at(command, Instant::now())
    }

    /// Same as [`Engine::dispatch`] with an explicit wall-clock time for
    /// tempo measurement.
    pub fn dispatch_at(&mut self, command: Command, now: Instant) -> Vec<OutboundEvent> {
        if let Err(err) = self.execute(command, now) {
            warn!(%err, "command failed");
            self.outbox.error(err.to_string());
        }
        self.outbox.drain()
    }

    /// Drains `commands` until every sender is dropped, forwarding produced
    /// events to `events`.
    pub fn run(mut self, commands: Receiver<Command>, events: Sender<OutboundEvent>) -> Result<()> {
        for command in commands.iter() {
            for event in self.dispatch(command) {
                events.send(event).map_err(|_| RouterError::QueueClosed)?;
            }
        }
        debug!("command queue closed");
        Ok(())
    }

    fn execute(&mut self, command: Command, now: Instant) -> Result<()> {
        match command {
            Command::InputFired(event) => self.input_fired(&event),
            Command::Midi(message) => self.midi_message(&message, now),
            Command::ClockPulse => self.clock_pulse(now),
            Command::ClockReset => {
                self.clock.reset_at(now);
                info!("clock reset");
                Ok(())
            }
            Command::SetClockGenerated(generated) => {
                self.clock_generated = generated;
                Ok(())
            }
            Command::StartLearning(node_id) => {
                self.nodes.get(&node_id)?;
                debug!(node = %node_id, "learning armed");
                self.learning = Some(node_id);
                Ok(())
            }
            Command::CancelLearning => {
                self.learning = None;
                Ok(())
            }
            Command::LinkCreate {
                input_id,
                node_id,
                source,
                device_name,
            } => {
                self.create_link(input_id, node_id, source, device_name)?;
                Ok(())
            }
            Command::LinkDelete(link_id) => self.links.delete(&link_id).map(|_| ()),
            Command::NodeRemove(node_id) => {
                self.nodes
                    .remove(&node_id)
                    .ok_or_else(|| RouterError::NodeNotFound(node_id.clone()))?;
                let dropped = self.links.delete_for_node(&node_id);
                debug!(node = %node_id, links = dropped, "node removed");
                if self.learning.as_deref() == Some(node_id.as_str()) {
                    self.learning = None;
                }
                Ok(())
            }
            Command::DeviceConnected { name, manufacturer } => {
                self.devices.register(name, manufacturer, self.default_bank);
                Ok(())
            }
            Command::DeviceBank { name, bank_index } => self.devices.set_bank(&name, bank_index),
            Command::AudioBlock(samples) => {
                let events = self.analyser.process_block(&samples)?;
                self.route_all(&events)
            }
        }
    }

    fn input_fired(&mut self, event: &InputEvent) -> Result<()> {
        self.inputs.observe(event);
        self.router
            .handle_input(&mut self.nodes, &self.links, event, &mut self.outbox)
    }

    /// Routes every event even when earlier ones fail. Several failures are
    /// merged into one error so each of them reaches the outbox.
    fn route_all(&mut self, events: &[InputEvent]) -> Result<()> {
        let mut errors: Vec<RouterError> = events
            .iter()
            .filter_map(|event| self.input_fired(event).err())
            .collect();
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(RouterError::msg(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        }
    }

    fn midi_message(&mut self, message: &MidiMessage, now: Instant) -> Result<()> {
        self.devices.record(message);

        match midi::normalize(message, self.learning.as_deref(), self.clock_generated) {
            MidiOutcome::Learned(binding) => self.learn(binding),
            MidiOutcome::Fired(event) => self.input_fired(&event),
            MidiOutcome::ClockPulse => self.clock_pulse(now),
            MidiOutcome::Ignored => Ok(()),
        }
    }

    fn learn(&mut self, binding: LearnedBinding) -> Result<()> {
        self.learning = None;
        let LearnedBinding {
            input_id,
            target_node_id,
            device_name,
        } = binding;
        debug!(input = %input_id, node = %target_node_id, "learned binding");
        self.create_link(input_id, target_node_id, InputKind::Midi, Some(device_name))
    }

    fn create_link(
        &mut self,
        input_id: String,
        node_id: String,
        source: InputKind,
        device_name: Option<String>,
    ) -> Result<()> {
        let node_type = self.nodes.get(&node_id)?.node_type();
        let link = self
            .links
            .create(input_id, node_id, node_type, source, device_name);
        self.outbox.push(OutboundEvent::InputLinkCreated {
            link_id: link.id.clone(),
            input_id: link.input_id.clone(),
            target_node_id: link.node_id.clone(),
            source_type: link.source,
            device_name: link.device_name.clone(),
        });
        Ok(())
    }

    fn clock_pulse(&mut self, now: Instant) -> Result<()> {
        let info = self.clock.pulse();
        let routed = self.input_fired(&InputEvent::new(
            LFO_INPUT_ID,
            info.delta,
            InputMeta::of(InputKind::Lfo),
        ));

        if info.is_beat() {
            self.outbox.push(OutboundEvent::ClockBeatIncremented);
            if info.is_bar() {
                let bpm = self.clock.calc_bpm_at(now);
                info!(bpm, "tempo measured");
                self.outbox.push(OutboundEvent::ClockBpmUpdated { bpm });
            }
        }

        routed
    }
}

/// Sends [`Command::ClockPulse`] at `bpm` from a background thread. Stops
/// after `limit` pulses, or when the engine queue closes.
pub fn spawn_ticker(handle: EngineHandle, bpm: f64, limit: Option<u64>) -> JoinHandle<()> {
    let interval = pulse_interval(bpm);
    thread::spawn(move || {
        let start = Instant::now();
        let mut sent = 0u64;
        while limit.map_or(true, |limit| sent < limit) {
            sent += 1;
            let due = start + interval.mul_f64(sent as f64);
            if let Some(wait) = due.checked_duration_since(Instant::now()) {
                thread::sleep(wait);
            }
            if handle.send(Command::ClockPulse).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        modifiers::ModifierSpec,
        nodes::{NodeKind, NodeType, NodeValue},
    };

    fn engine(generated: bool) -> Engine {
        let mut config = AppConfig::default();
        config.clock.generated = generated;
        let mut engine = Engine::new(&config);
        engine.load_project(ProjectSnapshot {
            nodes: vec![
                Node::value("level"),
                Node::new(
                    "wave",
                    NodeKind::LfoDriven {
                        lfo_option_ids: vec!["rate".to_string()],
                    },
                ),
                Node::new("rate", NodeKind::LfoOption { key: "rate".into() }).with_value(1.0),
            ],
            links: Vec::new(),
        });
        engine
    }

    fn midi(data: &[u8]) -> Command {
        Command::Midi(MidiMessage::new(data, 0.0, "pad"))
    }

    #[test]
    fn learn_binds_next_midi_message() {
        let mut engine = engine(true);
        assert!(engine.dispatch(Command::StartLearning("level".into())).is_empty());

        let events = engine.dispatch(midi(&[176, 7, 64]));
        assert_eq!(
            events,
            vec![OutboundEvent::InputLinkCreated {
                link_id: "link_1".to_string(),
                input_id: "midi_1767".to_string(),
                target_node_id: "level".to_string(),
                source_type: InputKind::Midi,
                device_name: Some("pad".to_string()),
            }]
        );
        assert_eq!(engine.learning(), None);

        let events = engine.dispatch(midi(&[176, 7, 127]));
        assert_eq!(
            events,
            vec![OutboundEvent::NodeValueUpdated {
                node_id: "level".to_string(),
                value: NodeValue::Number(1.0),
            }]
        );
        assert_eq!(engine.inputs().get("midi_1767").unwrap().value, Some(1.0));
    }

    #[test]
    fn learning_requires_existing_node_and_can_be_cancelled() {
        let mut engine = engine(true);

        let events = engine.dispatch(Command::StartLearning("ghost".into()));
        assert!(matches!(events.as_slice(), [OutboundEvent::ProjectError { .. }]));
        assert_eq!(engine.learning(), None);

        engine.dispatch(Command::StartLearning("level".into()));
        engine.dispatch(Command::CancelLearning);
        assert!(engine.dispatch(midi(&[176, 7, 64])).is_empty());
        assert!(engine.links().is_empty());
    }

    #[test]
    fn external_clock_only_pulses_when_not_generated() {
        let mut internal = engine(true);
        internal.dispatch(midi(&[248]));
        assert_eq!(internal.clock().pulses(), 0);

        let mut external = engine(false);
        external.dispatch(midi(&[248]));
        assert_eq!(external.clock().pulses(), 1);

        external.dispatch(Command::SetClockGenerated(true));
        external.dispatch(midi(&[248]));
        assert_eq!(external.clock().pulses(), 1);
    }

    #[test]
    fn clock_emits_beats_and_bpm() {
        let mut engine = engine(true);
        let start = Instant::now();
        engine.dispatch_at(Command::ClockReset, start);

        let mut beats = 0;
        let mut bpms = Vec::new();
        for pulse in 1..=96u32 {
            let now = start + Duration::from_millis(500) * pulse / 96;
            for event in engine.dispatch_at(Command::ClockPulse, now) {
                match event {
                    OutboundEvent::ClockBeatIncremented => beats += 1,
                    OutboundEvent::ClockBpmUpdated { bpm } => bpms.push(bpm),
                    other => panic!("unexpected event {other:?}"),
                }
            }
        }

        assert_eq!(beats, 4);
        assert_eq!(bpms, [480]);
    }

    #[test]
    fn clock_pulses_drive_lfo_nodes() {
        let mut engine = engine(true);
        engine.dispatch(Command::LinkCreate {
            input_id: LFO_INPUT_ID.to_string(),
            node_id: "wave".to_string(),
            source: InputKind::Lfo,
            device_name: None,
        });

        let events = engine.dispatch(Command::ClockPulse);
        let delta = engine.clock().delta();
        let expected = crate::lfo::evaluate(delta, crate::LfoShape::Sine, 1.0);
        assert_eq!(
            events,
            vec![OutboundEvent::NodeValueUpdated {
                node_id: "wave".to_string(),
                value: NodeValue::Number(expected),
            }]
        );
    }

    #[test]
    fn routing_failures_surface_as_one_project_error() {
        let mut engine = engine(true);
        engine.nodes_mut().insert(
            Node::new("m", NodeKind::Modifier(ModifierSpec::new("warp"))).with_value(0.5),
        );
        engine.nodes_mut().insert(Node::value("bent").with_modifiers(["m"]));
        for node in ["bent", "level"] {
            engine.dispatch(Command::LinkCreate {
                input_id: "audio_0".into(),
                node_id: node.into(),
                source: InputKind::Audio,
                device_name: None,
            });
        }

        let events = engine.dispatch(Command::InputFired(InputEvent::new(
            "audio_0",
            0.4,
            InputMeta::of(InputKind::Audio),
        )));

        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            OutboundEvent::NodeValueUpdated { node_id, .. } if node_id == "level"
        ));
        assert!(matches!(
            &events[1],
            OutboundEvent::ProjectError { message } if message.contains("warp")
        ));
    }

    #[test]
    fn link_delete_and_devices() {
        let mut engine = engine(true);
        engine.dispatch(Command::DeviceConnected {
            name: "pad".into(),
            manufacturer: "Acme".into(),
        });
        engine.dispatch(Command::LinkCreate {
            input_id: "audio_0".into(),
            node_id: "level".into(),
            source: InputKind::Audio,
            device_name: None,
        });
        assert_eq!(engine.links().iter().next().unwrap().node_type, NodeType::Value);

        assert!(engine.dispatch(Command::LinkDelete("link_1".into())).is_empty());
        assert!(engine.links().is_empty());
        assert!(matches!(
            engine.dispatch(Command::LinkDelete("link_1".into())).as_slice(),
            [OutboundEvent::ProjectError { .. }]
        ));

        engine.dispatch(midi(&[144, 60, 100]));
        assert!(engine.devices().get("pad").unwrap().last_message.is_some());
    }

    #[test]
    fn audio_blocks_feed_audio_inputs() {
        let mut engine = engine(true);
        engine.dispatch(Command::LinkCreate {
            input_id: "audio_0".into(),
            node_id: "level".into(),
            source: InputKind::Audio,
            device_name: None,
        });

        let events = engine.dispatch(Command::AudioBlock(vec![0.0; 1024]));
        assert_eq!(
            events,
            vec![OutboundEvent::NodeValueUpdated {
                node_id: "level".to_string(),
                value: NodeValue::Number(0.0),
            }]
        );
        assert_eq!(engine.inputs().len(), 4);
    }

    #[test]
    fn audio_block_reports_every_failing_band() {
        let mut engine = engine(true);
        engine.nodes_mut().insert(
            Node::new("m", NodeKind::Modifier(ModifierSpec::new("warp"))).with_value(0.5),
        );
        engine.nodes_mut().insert(Node::value("bent").with_modifiers(["m"]));
        for input in ["audio_0", "audio_2"] {
            engine.dispatch(Command::LinkCreate {
                input_id: input.into(),
                node_id: "bent".into(),
                source: InputKind::Audio,
                device_name: None,
            });
        }

        let events = engine.dispatch(Command::AudioBlock(vec![0.0; 1024]));
        match events.as_slice() {
            [OutboundEvent::ProjectError { message }] => {
                assert!(message.contains("audio_0"));
                assert!(message.contains("audio_2"));
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn removing_a_node_drops_its_links() {
        let mut engine = engine(true);
        for input in ["audio_0", "audio_1"] {
            engine.dispatch(Command::LinkCreate {
                input_id: input.into(),
                node_id: "level".into(),
                source: InputKind::Audio,
                device_name: None,
            });
        }
        engine.dispatch(Command::StartLearning("level".into()));

        assert!(engine.dispatch(Command::NodeRemove("level".into())).is_empty());
        assert!(engine.nodes().get("level").is_err());
        assert!(engine.links().is_empty());
        assert_eq!(engine.learning(), None);
        assert!(matches!(
            engine.dispatch(Command::NodeRemove("level".into())).as_slice(),
            [OutboundEvent::ProjectError { .. }]
        ));
    }

    #[test]
    fn device_bank_can_be_switched() {
        let mut engine = engine(true);
        engine.dispatch(Command::DeviceConnected {
            name: "pad".into(),
            manufacturer: "Acme".into(),
        });

        let events = engine.dispatch(Command::DeviceBank {
            name: "pad".into(),
            bank_index: 3,
        });
        assert!(events.is_empty());
        assert_eq!(engine.devices().get("pad").unwrap().bank_index, 3);

        let events = engine.dispatch(Command::DeviceBank {
            name: "keys".into(),
            bank_index: 1,
        });
        assert!(matches!(events.as_slice(), [OutboundEvent::ProjectError { .. }]));
    }

    #[test]
    fn run_processes_queue_in_order() {
        let engine = engine(true);
        let (handle, commands) = command_queue();
        let (events_tx, events_rx) = crossbeam_channel::unbounded();

        handle
            .send(Command::LinkCreate {
                input_id: "midi_1767".into(),
                node_id: "level".into(),
                source: InputKind::Midi,
                device_name: None,
            })
            .unwrap();
        handle.fire("midi_1767", 0.25, InputMeta::of(InputKind::Midi)).unwrap();
        handle.fire("midi_1767", 0.75, InputMeta::of(InputKind::Midi)).unwrap();
        drop(handle);

        engine.run(commands, events_tx).unwrap();
        let values: Vec<_> = events_rx
            .try_iter()
            .filter_map(|event| match event {
                OutboundEvent::NodeValueUpdated { value, .. } => value.as_number(),
                _ => None,
            })
            .collect();
        assert_eq!(values, [0.25, 0.75]);
    }

    #[test]
    fn ticker_stops_after_limit() {
        let (handle, commands) = command_queue();
        spawn_ticker(handle, 6000.0, Some(5)).join().unwrap();
        assert_eq!(commands.try_iter().count(), 5);
    }

    #[test]
    fn demo_project_replays() {
        let project = include_str!("../../../../demos/project.json");
        let mut engine = Engine::new(&AppConfig::default());
        engine.load_project(ProjectSnapshot::from_json_str(project).unwrap());

        let mut events = Vec::new();
        for line in include_str!("../../../../demos/events.jsonl").lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            let command = if value.get("inputId").is_some() {
                Command::InputFired(serde_json::from_value(value).unwrap())
            } else {
                Command::Midi(serde_json::from_value(value).unwrap())
            };
            events.extend(engine.dispatch(command));
        }

        assert!(!events
            .iter()
            .any(|event| matches!(event, OutboundEvent::ProjectError { .. })));
        let shots = events
            .iter()
            .filter(|event| matches!(event, OutboundEvent::ShotFired { .. }))
            .count();
        assert_eq!(shots, 2);

        let brightness = engine.nodes().get("brightness").unwrap().value.as_number().unwrap();
        approx::assert_relative_eq!(brightness, 0.6, epsilon = 1e-9);
        assert_eq!(engine.nodes().get("palette").unwrap().value, NodeValue::from("neon"));
        assert_eq!(engine.devices().len(), 0);
    }

    #[test]
    fn parses_project_snapshot() {
        let json = r#"{
            "nodes": [{ "id": "XX", "type": "value" }],
            "links": [{
                "id": "link_7", "inputId": "audio_0", "nodeId": "XX",
                "nodeType": "value", "source": "audio"
            }]
        }"#;
        let snapshot = ProjectSnapshot::from_json_str(json).unwrap();
        let mut engine = engine(true);
        engine.load_project(snapshot);

        assert_eq!(engine.links().bound_to("audio_0").count(), 1);
        engine.dispatch(Command::LinkCreate {
            input_id: "audio_1".into(),
            node_id: "XX".into(),
            source: InputKind::Audio,
            device_name: None,
        });
        assert!(engine.links().get("link_8").is_some());
    }
}
