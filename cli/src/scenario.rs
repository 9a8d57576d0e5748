//! JSON scenario files for the `run` subcommand
//!
//! A scenario names the nodes, the radio links between them, the protocol
//! variant, optional per-node energy classes, optional tunable overrides,
//! and per-port loss probabilities. See `demos/` for examples.

use anyhow::{bail, Context, Result};
use canopy_core::config::{ACKNOWLEDGEMENT_PORT, MESSAGING_PORT, TREE_GOSSIP_PORT};
use canopy_core::sim::SimNetwork;
use canopy_core::{EnergyClass, NodeConfig, NodeId, Tunables, Variant};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub root: NodeId,
    pub nodes: Vec<ScenarioNode>,
    pub links: Vec<(NodeId, NodeId)>,
    #[serde(default = "default_variant")]
    pub variant: Variant,
    #[serde(default)]
    pub tunables: Option<Tunables>,
    #[serde(default)]
    pub gossip_loss: f64,
    #[serde(default)]
    pub data_loss: f64,
    #[serde(default)]
    pub ack_loss: f64,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioNode {
    pub id: NodeId,
    #[serde(default)]
    pub energy: Option<EnergyClass>,
}

fn default_variant() -> Variant {
    Variant::Base
}

pub fn load(path: &Path) -> Result<Scenario> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    let scenario: Scenario = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse scenario {}", path.display()))?;
    if !scenario.nodes.iter().any(|n| n.id == scenario.root) {
        bail!("scenario root {} is not in the node list", scenario.root);
    }
    Ok(scenario)
}

pub fn build(scenario: &Scenario, seed: u64) -> Result<SimNetwork> {
    let mut net = SimNetwork::new(seed);
    for node in &scenario.nodes {
        let mut config = if node.id == scenario.root {
            NodeConfig::root(node.id)
        } else {
            NodeConfig::member(node.id)
        };
        config = config.with_variant(scenario.variant);
        if let Some(tunables) = &scenario.tunables {
            config = config.with_tunables(tunables.clone());
        }
        net.add_node(config)
            .with_context(|| format!("adding node {}", node.id))?;
    }
    for &(a, b) in &scenario.links {
        net.link(a, b)
            .with_context(|| format!("linking {a} and {b}"))?;
    }
    for node in &scenario.nodes {
        if let Some(class) = node.energy {
            if let Some(n) = net.node_mut(node.id) {
                n.set_energy_state(class);
            }
        }
    }
    for (port, loss) in [
        (TREE_GOSSIP_PORT, scenario.gossip_loss),
        (MESSAGING_PORT, scenario.data_loss),
        (ACKNOWLEDGEMENT_PORT, scenario.ack_loss),
    ] {
        if loss > 0.0 {
            net.set_loss(port, loss);
        }
    }
    Ok(net)
}
