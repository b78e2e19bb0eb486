//! Per-node modifier chains.
//!
//! A chain is an ordered list of modifier specs. Consecutive entries with
//! `pass_to_next` set contribute their value to the next invocation instead
//! of running on their own, so several list entries can feed a single
//! transform call.

use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{InputKind, RouterError, Result};

/// Key of the transform that shot nodes never apply to audio input.
pub const THRESHOLD_KEY: &str = "threshold";

/// Shape of a modifier node. Its parameter lives in the owning node's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifierSpec {
    pub key: String,
    /// Only run when the triggering input has this kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<InputKind>,
    #[serde(default)]
    pub pass_to_next: bool,
}

impl ModifierSpec {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            input_type: None,
            pass_to_next: false,
        }
    }

    pub fn only_for(mut self, kind: InputKind) -> Self {
        self.input_type = Some(kind);
        self
    }

    pub fn passing(mut self) -> Self {
        self.pass_to_next = true;
        self
    }

    /// Whether this modifier participates for an input of `kind`.
    pub fn accepts(&self, kind: Option<InputKind>) -> bool {
        match self.input_type {
            None => true,
            Some(filter) => kind.map(|kind| kind.satisfies(filter)).unwrap_or(false),
        }
    }
}

/// A modifier resolved from the node table, paired with its parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainEntry<'a> {
    pub spec: &'a ModifierSpec,
    pub value: f64,
}

/// Executes a transform by key.
pub trait ModifierWork {
    fn work(&self, key: &str, values: &[f64], signal: f64) -> Result<f64>;
}

/// Folds `signal` through `entries` in declared order.
///
/// Entries rejected by their input-type filter are skipped without breaking
/// the pending value run. Values of a trailing run that never reaches a
/// terminating entry are dropped.
pub fn apply_chain<W>(
    work: &W,
    kind: Option<InputKind>,
    entries: &[ChainEntry<'_>],
    signal: f64,
) -> Result<f64>
where
    W: ModifierWork + ?Sized,
{
    let mut signal = signal;
    let mut pending = Vec::new();

    for entry in entries.iter().filter(|entry| entry.spec.accepts(kind)) {
        pending.push(entry.value);
        if !entry.spec.pass_to_next {
            signal = work.work(&entry.spec.key, &pending, signal)?;
            pending.clear();
        }
    }

    Ok(signal)
}

/// Signature of a registered transform: `(collected values, signal) -> signal`.
pub type TransformFn = Arc<dyn Fn(&[f64], f64) -> std::result::Result<f64, String> + Send + Sync>;

/// Registry of transforms keyed by modifier name.
#[derive(Clone)]
pub struct ModifierRegistry {
    transforms: HashMap<String, TransformFn>,
}

impl ModifierRegistry {
    pub fn empty() -> Self {
        Self {
            transforms: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in transforms.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("gain", |values, signal| {
            let amount = first(values)?;
            Ok((signal * amount * 2.0).clamp(0.0, 1.0))
        });
        registry.register(THRESHOLD_KEY, |values, signal| {
            if values.is_empty() {
                return Err("no threshold values".to_string());
            }
            let reached = values.iter().filter(|level| signal >= **level).count();
            Ok(reached as f64 / values.len() as f64)
        });
        registry.register("range", |values, signal| {
            let min = first(values)?;
            let max = values.get(1).copied().unwrap_or(1.0);
            Ok(min + signal * (max - min))
        });
        registry.register("subtract", |values, signal| {
            let amount = first(values)?;
            Ok((signal - amount).max(0.0))
        });
        registry.register("invert", |_, signal| Ok(1.0 - signal));
        registry
    }

    pub fn register<F>(&mut self, key: impl Into<String>, transform: F)
    where
        F: Fn(&[f64], f64) -> std::result::Result<f64, String> + Send + Sync + 'static,
    {
        self.transforms.insert(key.into(), Arc::new(transform));
    }
}

impl Default for ModifierRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ModifierWork for ModifierRegistry {
    fn work(&self, key: &str, values: &[f64], signal: f64) -> Result<f64> {
        let transform = self
            .transforms
            .get(key)
            .ok_or_else(|| RouterError::UnknownModifierKind(key.to_string()))?;
        transform(values, signal).map_err(|reason| RouterError::modifier(key, reason))
    }
}

impl fmt::Debug for ModifierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.transforms.keys().collect();
        keys.sort();
        f.debug_struct("ModifierRegistry")
            .field("keys", &keys)
            .finish()
    }
}

fn first(values: &[f64]) -> std::result::Result<f64, String> {
    values
        .first()
        .copied()
        .ok_or_else(|| "missing parameter value".to_string())
}
