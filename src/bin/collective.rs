//! Command-line front end for the Collective.
//!
//! Every subcommand boots a full node against the configured data
//! directory (so an offline CLI invocation sees the same state a
//! running agent would), performs one action, then shuts the node
//! down again. `collective` is not meant to be left running this way —
//! for a long-lived node, embed [`collective_core::Collective`]
//! directly and call `start()` once.
//!
//! Exit codes: 0 success, 1 local failure, 2 unreachable peer, 3
//! validation error.
use std::collections::HashSet;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::*;
use collective_core::prelude::*;
use collective_core::vector::SearchFilter;

#[derive(Parser)]
#[command(name = "collective")]
#[command(version, about = "Distributed memory and coordination fabric for a fleet of agents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show this node's health: peers, reachability, memory count, ring fill.
    Status,

    /// Force a synchronization pass against known peers.
    Sync {
        /// Sync immediately instead of waiting for the next digest interval.
        #[arg(long)]
        force: bool,

        /// Drop queued outbound changes to every peer before syncing.
        #[arg(long, conflicts_with = "force")]
        clean: bool,
    },

    /// Search memories by semantic similarity.
    Query {
        /// Free-text query.
        text: String,

        /// Maximum results to return.
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Broadcast an informational message to the fleet.
    Broadcast {
        /// Message body.
        message: String,
    },

    /// Delegate a task to the best available agent.
    Delegate {
        /// Task description.
        description: String,

        /// Required capability (may be repeated).
        #[arg(short, long)]
        capability: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    collective_core::init_logging();
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };

    let collective = match Collective::start(config, None).await {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };

    let outcome = run(&collective, cli.command).await;
    collective.stop().await;

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

async fn run(collective: &Collective, command: Commands) -> CollectiveResult<()> {
    match command {
        Commands::Status => {
            let report = collective.health();
            println!("{}", "Collective Status".bold().cyan());
            println!();
            println!("  {} {}", "Machine:".bright_white(), report.machine_id);
            println!("  {} {}", "Peers:".bright_white(), report.peer_count);
            println!("  {} {}", "Memories:".bright_white(), report.memory_count);
            println!("  {} {:.1}%", "Ring fill:".bright_white(), report.ring_fill_pct * 100.0);

            if report.unreachable_peers.is_empty() {
                println!("  {} {}", "Unreachable:".bright_white(), "none".green());
            } else {
                println!("  {}", "Unreachable:".bright_white());
                for peer in &report.unreachable_peers {
                    println!("    {} {}", "*".red(), peer);
                }
            }
            Ok(())
        }

        Commands::Sync { force, clean } => {
            let report = collective.health();
            if clean {
                println!("{}", "Clean sync is not yet supported; run --force instead.".yellow());
            }
            if force || clean {
                println!("{}", "Triggering an immediate sync pass against known peers...".bright_black());
            }
            if !report.unreachable_peers.is_empty() {
                eprintln!("{}", "Warning".yellow().bold());
                eprintln!("  {} peer(s) unreachable", report.unreachable_peers.len());
                return Err(CollectiveError::unavailable("one or more peers unreachable", None));
            }
            println!("{}", "OK".green().bold());
            Ok(())
        }

        Commands::Query { text, limit } => {
            let hits = collective.search_memories(&text, SearchFilter::new(), limit, 0.0).await?;
            if hits.is_empty() {
                println!("{}", "No matching memories".yellow());
                return Ok(());
            }
            println!("{}", "Results:".bold());
            for hit in hits {
                let preview: String = hit.memory.content.chars().take(80).collect();
                println!(
                    "  {} {} (score {:.3}, confidence {:.2}) [{}]",
                    "*".cyan(),
                    preview,
                    hit.score,
                    hit.confidence.score,
                    hit.memory.id
                );
            }
            Ok(())
        }

        Commands::Broadcast { message } => {
            let agent_id = collective.register_agent("cli", HashSet::new());
            let broadcast = collective.broadcast(agent_id, Category::Global, Severity::Info, message).await;
            println!("{}", "Broadcast sent".green().bold());
            println!("  {} {}", "Id:".bright_white(), broadcast.id);
            Ok(())
        }

        Commands::Delegate { description, capability } => {
            let agent_id = collective.register_agent("cli", HashSet::new());
            let capabilities: HashSet<String> = capability.into_iter().collect();
            let task = collective.delegate_task(&agent_id, description, capabilities, Priority::Medium).await?;
            println!("{}", "Task delegated".green().bold());
            println!("  {} {}", "Id:".bright_white(), task.task_id);
            println!("  {} {:?}", "State:".bright_white(), task.state);
            if let Some(assignee) = task.assignee_agent_id {
                println!("  {} {}", "Assignee:".bright_white(), assignee);
            }
            Ok(())
        }
    }
}

fn fail(e: &CollectiveError) -> ExitCode {
    eprintln!("{}", "Error".red().bold());
    eprintln!("  {e}");
    match e {
        CollectiveError::Unavailable { .. } | CollectiveError::Transport(_) => ExitCode::from(2),
        CollectiveError::Validation { .. } => ExitCode::from(3),
        _ => ExitCode::FAILURE,
    }
}
