// canopy — demo CLI driving the protocol over the in-process simulator
//
// Builds a canned or file-described topology, runs it period by period
// printing the tree as it takes shape, then pushes one payload up from the
// farthest node to show delivery.

mod scenario;

use anyhow::{Context, Result};
use canopy_core::sim::{self, SimNetwork};
use canopy_core::tree::DIST_UNDEFINED;
use canopy_core::{NodeId, Role};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Canopy — maximum-leaf spanning trees over sleepy radios", long_about = None)]
#[command(version)]
struct Cli {
    /// Seed for the simulated network
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Periods to simulate before the demo send
    #[arg(long, default_value_t = 30)]
    periods: u64,

    /// Pace each period against the wall clock
    #[arg(long)]
    live: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// A root and a line of members, one hop apart
    Chain {
        /// Members behind the root
        #[arg(long, default_value_t = 4)]
        nodes: usize,
    },
    /// A root with every member in range of everyone
    Star {
        #[arg(long, default_value_t = 5)]
        nodes: usize,
    },
    /// Two rival relays competing for three children
    Fork,
    /// Energy-aware tree over a mixed-energy cluster
    Energy,
    /// Run a JSON scenario file (see demos/)
    Run { path: PathBuf },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut net = match &cli.command {
        Commands::Chain { nodes } => sim::chain(cli.seed, *nodes)?,
        Commands::Star { nodes } => sim::star(cli.seed, *nodes)?,
        Commands::Fork => sim::fork(cli.seed)?,
        Commands::Energy => sim::energy_cluster(cli.seed)?,
        Commands::Run { path } => {
            let scenario = scenario::load(path)?;
            scenario::build(&scenario, cli.seed)?
        }
    };

    tracing::info!(seed = cli.seed, nodes = net.ids().len(), "network built");

    let root = net
        .ids()
        .into_iter()
        .find(|&id| net.node(id).is_some_and(|n| matches!(n.role(), Role::Root)))
        .context("network has no root")?;
    if let Some(node) = net.node_mut(root) {
        node.on_deliver(Box::new(|payload| {
            println!(
                "{} {:?}",
                "delivered at root:".green().bold(),
                String::from_utf8_lossy(payload)
            );
        }));
    }

    for period in 1..=cli.periods {
        net.run_for(1_000);
        print_tree(&net, period);
        if cli.live {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }

    if let Some(tail) = farthest_member(&net) {
        println!(
            "{} node {} sends a greeting up the tree",
            "sending:".yellow().bold(),
            tail
        );
        net.send_from(tail, b"hello from the leaves")?;
        net.run_for(5_000);
    }
    Ok(())
}

fn print_tree(net: &SimNetwork, period: u64) {
    let header = format!("— period {period} —");
    println!("{}", header.as_str().bold());
    for id in net.ids() {
        let Some(node) = net.node(id) else { continue };
        let s = node.summary();
        let kind = match s.kind() {
            "root" => "root".blue().bold(),
            "backbone" => "backbone".cyan(),
            "leaf" => "leaf".green(),
            _ => "undefined".red(),
        };
        let radio = if s.awake {
            "awake".normal()
        } else {
            "asleep".dimmed()
        };
        let energy = if node.tree().variant().is_energy_aware() {
            format!(" energy={}", s.energy)
        } else {
            String::new()
        };
        if matches!(node.role(), Role::Member) && !node.is_undefined() {
            println!(
                "  {:>3}  {:<18} parent={:<4} distance={:<4} children={:<4}{} {}",
                s.id, kind, s.parent, s.distance, s.children, energy, radio
            );
        } else {
            println!("  {:>3}  {:<18}{} {}", s.id, kind, energy, radio);
        }
    }
}

/// The attached member with the largest hop count; detached nodes have
/// nothing to demo with.
fn farthest_member(net: &SimNetwork) -> Option<NodeId> {
    net.ids()
        .into_iter()
        .filter_map(|id| {
            let node = net.node(id)?;
            if !matches!(node.role(), Role::Member) {
                return None;
            }
            let distance = node.record().distance;
            (distance != DIST_UNDEFINED).then_some((id, distance))
        })
        .max_by_key(|&(id, distance)| (distance, id))
        .map(|(id, _)| id)
}
