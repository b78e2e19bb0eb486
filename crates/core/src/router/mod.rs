//! Resolves input events to the nodes bound to them and commits the new
//! node values.

use tracing::{debug, warn};

use crate::{
    events::{OutboundEvent, Outbox},
    lfo::{self, LfoShape},
    modifiers::{apply_chain, ChainEntry, ModifierWork},
    nodes::{NodeKind, NodeTable, NodeValue, SelectOption},
    shot, InputEvent, InputKind, InputLink, LinkTable, RouterError, Result,
};

const SHAPE_KEY: &str = "shape";
const RATE_KEY: &str = "rate";

/// State changes decided for one node, applied after resolution.
#[derive(Debug, Clone, PartialEq)]
enum Resolution {
    Commit(NodeValue),
    Shot {
        fire: Option<(String, String)>,
        armed: Option<bool>,
        value: f64,
    },
}

/// Dispatches input events to bound nodes.
#[derive(Debug, Clone)]
pub struct InputRouter<W> {
    work: W,
}

impl<W: ModifierWork> InputRouter<W> {
    pub fn new(work: W) -> Self {
        Self { work }
    }

    pub fn work(&self) -> &W {
        &self.work
    }

    /// Routes `event` to every node bound to its input.
    ///
    /// Each node is resolved and committed independently. Nodes that fail are
    /// skipped and reported together in a single [`RouterError::Fanout`];
    /// nodes already updated stay updated.
    pub fn handle_input(
        &self,
        nodes: &mut NodeTable,
        links: &LinkTable,
        event: &InputEvent,
        outbox: &mut Outbox,
    ) -> Result<()> {
        let value = event
            .value
            .ok_or(RouterError::InvalidInput("input event carries no value"))?;
        let kind = event.metadata.effective_kind();

        let mut bound = 0;
        let mut failures = Vec::new();
        for link in links.bound_to(&event.input_id) {
            bound += 1;
            let outcome = self
                .resolve(nodes, link, kind, value)
                .and_then(|resolution| apply(nodes, &link.node_id, resolution, outbox));
            if let Err(err) = outcome {
                warn!(input = %event.input_id, node = %link.node_id, %err, "node update skipped");
                failures.push(format!("{}: {err}", link.node_id));
            }
        }

        if bound == 0 {
            debug!(input = %event.input_id, "no nodes bound to input");
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RouterError::Fanout {
                input_id: event.input_id.clone(),
                failures,
            })
        }
    }

    fn resolve(
        &self,
        nodes: &NodeTable,
        link: &InputLink,
        kind: Option<InputKind>,
        value: f64,
    ) -> Result<Resolution> {
        let node = nodes.get(&link.node_id)?;

        match &node.kind {
            NodeKind::Shot {
                sketch_id,
                method,
                armed,
            } => match kind {
                Some(InputKind::NoteOn) => Ok(Resolution::Shot {
                    fire: Some((sketch_id.clone(), method.clone())),
                    armed: None,
                    value,
                }),
                Some(InputKind::Audio) => {
                    let ids = link.active_modifier_ids(node, nodes, kind)?;
                    let level = self.run_chain(nodes, &ids, kind, value)?;
                    let step = shot::on_audio(*armed, level);
                    Ok(Resolution::Shot {
                        fire: step.fire.then(|| (sketch_id.clone(), method.clone())),
                        armed: step.arm,
                        value: level,
                    })
                }
                _ => Ok(Resolution::Commit(NodeValue::Number(value))),
            },
            NodeKind::Select { options } => {
                let option = select_option(options, value).ok_or_else(|| RouterError::InvalidLink {
                    input_id: link.input_id.clone(),
                    node_id: node.id.clone(),
                    reason: "select node has no options".to_string(),
                })?;
                Ok(Resolution::Commit(option.value.clone()))
            }
            NodeKind::LfoDriven { lfo_option_ids } => {
                let (shape, rate) = lfo_params(nodes, lfo_option_ids)?;
                let wave = lfo::evaluate(value, shape, rate);
                let ids = link.active_modifier_ids(node, nodes, kind)?;
                let out = self.run_chain(nodes, &ids, kind, wave)?;
                Ok(Resolution::Commit(NodeValue::Number(out)))
            }
            NodeKind::Value | NodeKind::LfoOption { .. } | NodeKind::Modifier(_) => {
                let ids = link.active_modifier_ids(node, nodes, kind)?;
                let out = self.run_chain(nodes, &ids, kind, value)?;
                Ok(Resolution::Commit(NodeValue::Number(out)))
            }
        }
    }

    fn run_chain<S: AsRef<str>>(
        &self,
        nodes: &NodeTable,
        modifier_ids: &[S],
        kind: Option<InputKind>,
        value: f64,
    ) -> Result<f64> {
        if modifier_ids.is_empty() {
            return Ok(value);
        }

        let entries = modifier_ids
            .iter()
            .map(|id| chain_entry(nodes, id.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        apply_chain(&self.work, kind, &entries, value)
    }
}

/// Option chosen by a continuous `value` in [0, 1]. Values outside the range
/// are clamped; ties round away from zero.
pub fn select_option(options: &[SelectOption], value: f64) -> Option<&SelectOption> {
    let last = options.len().checked_sub(1)?;
    let index = (value.clamp(0.0, 1.0) * last as f64).round() as usize;
    options.get(index.min(last))
}

fn chain_entry<'n>(nodes: &'n NodeTable, id: &str) -> Result<ChainEntry<'n>> {
    let node = nodes.get(id)?;
    match (&node.kind, node.value.as_number()) {
        (NodeKind::Modifier(spec), Some(value)) => Ok(ChainEntry { spec, value }),
        (NodeKind::Modifier(_), None) => Err(RouterError::msg(format!(
            "modifier `{id}` has a non-numeric value"
        ))),
        _ => Err(RouterError::msg(format!("`{id}` is not a modifier"))),
    }
}

/// Shape and rate supplied by the option nodes of an LFO-driven node.
fn lfo_params(nodes: &NodeTable, option_ids: &[String]) -> Result<(LfoShape, f64)> {
    let mut shape = LfoShape::default();
    let mut rate = 1.0;

    for option in nodes.get_many(option_ids)? {
        let NodeKind::LfoOption { key } = &option.kind else {
            return Err(RouterError::msg(format!(
                "`{}` is not an LFO option",
                option.id
            )));
        };
        match key.as_str() {
            SHAPE_KEY => {
                shape = option
                    .value
                    .as_text()
                    .ok_or_else(|| {
                        RouterError::msg(format!("LFO shape `{}` must be a name", option.id))
                    })?
                    .parse()?
            }
            RATE_KEY => {
                rate = option.value.as_number().ok_or_else(|| {
                    RouterError::msg(format!("LFO rate `{}` must be a number", option.id))
                })?
            }
            _ => {}
        }
    }

    Ok((shape, rate))
}

fn apply(
    nodes: &mut NodeTable,
    node_id: &str,
    resolution: Resolution,
    outbox: &mut Outbox,
) -> Result<()> {
    match resolution {
        Resolution::Commit(value) => {
            nodes.set_value(node_id, value.clone())?;
            outbox.node_value(node_id, value);
        }
        Resolution::Shot { fire, armed, value } => {
            if let Some((sketch_id, method)) = fire {
                outbox.push(OutboundEvent::ShotFired { sketch_id, method });
            }
            if let Some(armed) = armed {
                nodes.set_armed(node_id, armed)?;
                let node_id = node_id.to_string();
                outbox.push(if armed {
                    OutboundEvent::ShotArmed { node_id }
                } else {
                    OutboundEvent::ShotDisarmed { node_id }
                });
            }
            nodes.set_value(node_id, NodeValue::Number(value))?;
            outbox.node_value(node_id, NodeValue::Number(value));
        }
    }
    Ok(())
}
