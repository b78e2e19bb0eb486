//! Core library for the Pulse Router engine.
//!
//! The crate routes time-varying control signals (MIDI, a generated or
//! external clock, LFOs and audio band levels) into the numeric parameters of
//! a live visuals engine. Each module owns one step of that pipeline, and the
//! [`Engine`] ties them together behind a single ordered command queue.

pub mod audio;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod inputs;
pub mod lfo;
pub mod midi;
pub mod modifiers;
pub mod nodes;
pub mod router;
pub mod shot;

pub use audio::AudioAnalyser;
pub use clock::{ClockGenerator, PulseInfo};
pub use config::{AppConfig, AudioConfig, ClockConfig, MidiConfig};
pub use engine::{command_queue, spawn_ticker, Command, Engine, EngineHandle, ProjectSnapshot};
pub use error::{Result, RouterError};
pub use events::{OutboundEvent, Outbox};
pub use inputs::{Input, InputEvent, InputKind, InputLink, InputMeta, InputTable, LinkTable};
pub use lfo::LfoShape;
pub use midi::{DeviceTable, MidiDevice, MidiMessage, MidiOutcome};
pub use modifiers::{ModifierRegistry, ModifierSpec, ModifierWork};
pub use nodes::{Node, NodeKind, NodeTable, NodeType, NodeValue, SelectOption};
pub use router::InputRouter;
