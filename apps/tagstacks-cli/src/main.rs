//! # TagStacks CLI
//!
//! A standalone walkthrough of tag stack replication. One authority owns the
//! counted gameplay tags of a single entity; observers hold mirrors that are
//! kept in sync through the versioned record stream.
//!
//! ## Stream model
//!
//! ```text
//! authority:  add/remove ──▶ tick buffer ──flush──▶ [Upsert@v, Remove@v+1, ...]
//! observer:   v == last+1 → apply    v <= last → ignore    v > last+1 → resync
//! ```

use std::io::{self, Write};

use clap::{Parser, Subcommand};
use colored::*;
use tagstack_core::{GameplayTag, TagStackAuthority, TagStackOwner};
use tagstack_delta::{
    encode_batch, DeltaReplicator, MirrorReplica, NetworkConfig, ReplicationCluster,
    ReplicationConfigBuilder, ReplicationError, SyncState,
};
use tracing_subscriber::EnvFilter;

type Cluster = ReplicationCluster<GameplayTag>;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "tagstacks")]
#[command(about = "Counted gameplay tags replicated from an authority to observers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Basic demo: mutate, coalesce, replicate, late join
    Demo,
    /// Lossy link: gaps, resync requests and eventual convergence
    Lossy {
        /// Probability that a payload is dropped
        #[arg(long, default_value_t = 0.3)]
        loss: f64,
        /// Number of ticks to simulate
        #[arg(long, default_value_t = 40)]
        ticks: usize,
        /// Number of observers
        #[arg(long, default_value_t = 3)]
        observers: usize,
        /// Seed for the simulated network
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
    /// Interactive REPL for manual experimentation
    Interactive,
}

const DEMO_TAGS: [&str; 6] = [
    "Status.Poisoned",
    "Status.Burning",
    "Status.Stunned",
    "Buff.Shield",
    "Buff.Haste",
    "Resource.Rage",
];

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn warn_line(text: &str) {
    println!("  {} {}", "!".bright_red(), text);
}

fn flush_arrow(records: usize, observers: usize) {
    println!(
        "  {} {} {} {}",
        "authority".bright_magenta(),
        format!("──{} record(s)──▶", records).bright_cyan(),
        format!("{} observer(s)", observers).bright_magenta(),
        "✓".bright_green()
    );
}

fn state_label(state: SyncState) -> ColoredString {
    match state {
        SyncState::Uninitialized => "uninitialized".dimmed(),
        SyncState::Synced => "synced".bright_green(),
        SyncState::Stale => "stale".bright_red(),
    }
}

fn show_stacks(title: &str, owner: &impl TagStackOwner<GameplayTag>, footer: Option<String>) {
    let border = "─".repeat(44);
    println!("  ┌{}┐", border);
    println!("  │ {:^42} │", title.bright_yellow().to_string());
    println!("  ├{}┤", border);

    let stacks = owner.owned_tag_stacks();
    if stacks.is_empty() {
        println!("  │ {:^42} │", "(no stacks)".dimmed().to_string());
    } else {
        for (tag, count) in stacks.iter() {
            let line = format!("  {:<30} × {:>5}", tag.name(), count);
            println!("  │ {:<42} │", line);
        }
    }
    if let Some(footer) = footer {
        println!("  ├{}┤", border);
        println!("  │ {:<42} │", footer);
    }
    println!("  └{}┘", border);
}

fn show_authority(cluster: &Cluster) {
    let authority = cluster.authority();
    show_stacks(
        "Authority",
        authority,
        Some(format!(
            "version {}  pending {}",
            authority.version(),
            authority.pending_len()
        )),
    );
}

fn show_mirror(id: &str, mirror: &MirrorReplica<GameplayTag>) {
    let last = mirror
        .last_applied()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string());
    show_stacks(
        &format!("Observer: {}", id),
        mirror,
        Some(format!("{} @ {}", state_label(mirror.state()), last)),
    );
}

fn show_observer_stats(cluster: &Cluster) {
    for (id, mirror) in cluster.observers() {
        let stats = mirror.stats();
        step(&format!(
            "{:<12} {:<14} applied={} resyncs={} dups={} gaps={} discarded={}",
            id,
            state_label(mirror.state()).to_string(),
            stats.applied,
            stats.resyncs,
            stats.duplicates,
            stats.gaps,
            stats.discarded
        ));
    }
}

fn convergence_result(converged: bool) {
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL OBSERVERS CONVERGED, mirrors match the authority"
                .bright_green()
                .bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED, some mirrors differ"
                .bright_red()
                .bold()
        );
    }
}

// ─── Demo ──────────────────────────────────────────────────────────────────

fn run_demo() -> Result<(), ReplicationError> {
    header("DEMO - Counted Tags & Delta Replication");

    let poisoned = GameplayTag::new("Status.Poisoned");
    let burning = GameplayTag::new("Status.Burning");
    let shield = GameplayTag::new("Buff.Shield");

    section("Phase 1: Two observers join an empty authority");
    let mut cluster = Cluster::new(
        ReplicationConfigBuilder::new().snapshot_interval(0).build(),
        NetworkConfig::default(),
    );
    cluster.add_observer("alice")?;
    cluster.add_observer("bob")?;
    cluster.drain_network()?;
    step("alice and bob received the join snapshot");

    section("Phase 2: Gameplay mutates the authority");
    let _ = cluster.authority_mut().add_tag_stack(poisoned.clone(), 3);
    step("Status.Poisoned += 3");
    let _ = cluster.authority_mut().add_tag_stack(shield.clone(), 1);
    step("Buff.Shield += 1");
    let flushed = cluster.tick()?;
    cluster.drain_network()?;
    flush_arrow(flushed, 2);
    show_authority(&cluster);

    section("Phase 3: Churn inside one tick collapses to the final state");
    let _ = cluster.authority_mut().add_tag_stack(burning.clone(), 1);
    cluster.authority_mut().remove_tag_stack(&burning, 1);
    step("Status.Burning += 1 then -= 1 (never visible to observers)");
    cluster.authority_mut().remove_tag_stack(&poisoned, 1);
    let _ = cluster.authority_mut().add_tag_stack(poisoned.clone(), 4);
    step("Status.Poisoned -= 1 then += 4");
    let flushed = cluster.tick()?;
    cluster.drain_network()?;
    flush_arrow(flushed, 2);
    step(&format!(
        "{} mutations coalesced away",
        cluster.authority().coalesced_changes()
    ));

    section("Phase 4: A late observer joins");
    cluster.add_observer("carol")?;
    cluster.drain_network()?;
    for (id, mirror) in cluster.observers() {
        show_mirror(id, mirror);
    }
    convergence_result(cluster.is_converged());

    section("Phase 5: Hierarchy queries on a mirror");
    let status = GameplayTag::new("Status");
    if let Some(carol) = cluster.observer("carol") {
        step(&format!(
            "carol has any Status.* stack: {}",
            carol.set().has_matching_tag(&status)
        ));
        step(&format!(
            "carol Status.* total: {}",
            carol.set().matching_stack_count(&status)
        ));
        step(&format!(
            "carol Buff.Shield count: {}",
            carol.tag_stack_count(&shield)
        ));
    }

    section("Wire format of one tick");
    let mut wire = DeltaReplicator::new();
    let _ = wire.add_stack(poisoned, 2);
    let _ = wire.add_stack(shield.clone(), 1);
    wire.remove_stack(&shield, 1);
    let payload = encode_batch(&wire.flush_tick())?;
    step(&String::from_utf8_lossy(&payload));

    Ok(())
}

// ─── Lossy ─────────────────────────────────────────────────────────────────

/// Deterministic mutation pattern for tick `n`.
fn mutate_for_tick(cluster: &mut Cluster, n: usize) {
    let tag = GameplayTag::new(DEMO_TAGS[n % DEMO_TAGS.len()]);
    let other = GameplayTag::new(DEMO_TAGS[(n * 7 + 3) % DEMO_TAGS.len()]);
    let authority = cluster.authority_mut();
    let _ = authority.add_tag_stack(tag, (n % 4) as i32 + 1);
    if n % 3 == 0 {
        authority.remove_tag_stack(&other, 2);
    }
}

fn run_lossy(loss: f64, ticks: usize, observers: usize, seed: u64) -> Result<(), ReplicationError> {
    header(&format!("LOSSY LINK - {:.0}% payload loss", loss * 100.0));

    section("Phase 1: Observers join over a reliable link");
    let mut cluster = Cluster::new(
        ReplicationConfigBuilder::new().snapshot_interval(10).build(),
        NetworkConfig::default(),
    );
    for i in 0..observers {
        cluster.add_observer(format!("observer_{}", i))?;
    }
    cluster.drain_network()?;
    step(&format!("{} observers synced", observers));

    section(&format!("Phase 2: {} ticks over the lossy link", ticks));
    cluster.set_network(NetworkConfig::lossy(loss).with_seed(seed));
    for n in 0..ticks {
        mutate_for_tick(&mut cluster, n);
        cluster.run_ticks(1)?;
    }
    step(&format!(
        "{} payloads sent, {} lost, {} bytes",
        cluster.network().sent_count(),
        cluster.network().lost_count(),
        cluster.bytes_sent()
    ));
    show_observer_stats(&cluster);
    convergence_result(cluster.is_converged());

    section("Phase 3: Link heals, stale observers resync");
    cluster.set_network(NetworkConfig::default());
    cluster.run_ticks(1)?;
    // A lost tail leaves no later version to reveal the gap
    cluster.broadcast_snapshot()?;
    cluster.drain_network()?;
    step("catch-up snapshot sent to every observer");
    show_observer_stats(&cluster);
    show_authority(&cluster);
    convergence_result(cluster.is_converged());

    Ok(())
}

// ─── Interactive REPL ──────────────────────────────────────────────────────

fn print_help() {
    println!();
    println!("  {}", "Commands:".bold().underline());
    println!("    {} <tag> [n]          Add n stacks (default 1)", "add".bright_cyan());
    println!("    {} <tag> [n]       Remove n stacks (default 1)", "remove".bright_cyan());
    println!("    {}                  Remove every stack", "clear".bright_cyan());
    println!("    {} [n]               Flush n ticks and deliver", "tick".bright_cyan());
    println!("    {} <name>            Add an observer", "join".bright_cyan());
    println!("    {} <name>           Drop an observer", "leave".bright_cyan());
    println!("    {} <rate>            Set payload loss rate", "loss".bright_cyan());
    println!("    {}               Send a snapshot to everyone", "snapshot".bright_cyan());
    println!("    {} [name]            Show authority or an observer", "show".bright_cyan());
    println!("    {} <parent>         Hierarchy query on the authority", "match".bright_cyan());
    println!("    {}                  Observer stats and convergence", "stats".bright_cyan());
    println!("    {}                   Exit", "quit".bright_cyan());
    println!();
}

fn parse_amount(arg: Option<&&str>) -> i32 {
    arg.and_then(|s| s.parse().ok()).unwrap_or(1)
}

fn run_interactive() {
    header("INTERACTIVE REPL - Tag Stack Replication");

    let mut cluster = Cluster::new(Default::default(), NetworkConfig::default());
    print_help();

    loop {
        print!("{}", "tagstacks> ".bright_cyan().bold());
        let _ = io::stdout().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() || input.is_empty() {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        let result = match parts[0] {
            "add" | "+" => {
                let Some(name) = parts.get(1) else {
                    warn_line("Usage: add <tag> [n]");
                    continue;
                };
                let tag = GameplayTag::new(name);
                let outcome = cluster
                    .authority_mut()
                    .add_tag_stack(tag.clone(), parse_amount(parts.get(2)));
                if let Some(overflow) = outcome.overflow {
                    warn_line(&format!(
                        "{} saturated at {}",
                        overflow.tag, overflow.saturated_at
                    ));
                }
                step(&format!(
                    "{} → {}",
                    tag,
                    cluster.authority().tag_stack_count(&tag)
                ));
                Ok(())
            }

            "remove" | "-" => {
                let Some(name) = parts.get(1) else {
                    warn_line("Usage: remove <tag> [n]");
                    continue;
                };
                let tag = GameplayTag::new(name);
                cluster
                    .authority_mut()
                    .remove_tag_stack(&tag, parse_amount(parts.get(2)));
                step(&format!(
                    "{} → {}",
                    tag,
                    cluster.authority().tag_stack_count(&tag)
                ));
                Ok(())
            }

            "clear" => {
                cluster.authority_mut().clear();
                step("authority cleared");
                Ok(())
            }

            "tick" | "t" => {
                let n = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(1);
                let mut flushed = 0;
                let mut result = Ok(());
                for _ in 0..n {
                    match cluster.tick().and_then(|f| {
                        cluster.drain_network()?;
                        Ok(f)
                    }) {
                        Ok(f) => flushed += f,
                        Err(err) => {
                            result = Err(err);
                            break;
                        }
                    }
                }
                flush_arrow(flushed, cluster.observers().count());
                result
            }

            "join" => {
                let Some(name) = parts.get(1) else {
                    warn_line("Usage: join <name>");
                    continue;
                };
                if cluster.observer(name).is_some() {
                    println!("  {} Observer '{}' already exists", "!".bright_yellow(), name);
                    continue;
                }
                let result = cluster.add_observer(*name).and_then(|_| cluster.drain_network());
                step(&format!("'{}' joined", name));
                result
            }

            "leave" => {
                let Some(name) = parts.get(1) else {
                    warn_line("Usage: leave <name>");
                    continue;
                };
                match cluster.remove_observer(name) {
                    Some(_) => step(&format!("'{}' left", name)),
                    None => warn_line(&format!("Unknown observer '{}'", name)),
                }
                Ok(())
            }

            "loss" => {
                let Some(rate) = parts.get(1).and_then(|s| s.parse::<f64>().ok()) else {
                    warn_line("Usage: loss <rate between 0 and 1>");
                    continue;
                };
                cluster.set_network(NetworkConfig::lossy(rate.clamp(0.0, 1.0)));
                step(&format!("loss rate set to {:.2}", rate.clamp(0.0, 1.0)));
                Ok(())
            }

            "snapshot" => {
                let result = cluster
                    .broadcast_snapshot()
                    .and_then(|_| cluster.drain_network());
                step("snapshot sent to every observer");
                result
            }

            "show" | "s" => {
                match parts.get(1) {
                    None => show_authority(&cluster),
                    Some(name) => match cluster.observer(name) {
                        Some(mirror) => show_mirror(name, mirror),
                        None => warn_line(&format!("Unknown observer '{}'", name)),
                    },
                }
                Ok(())
            }

            "match" => {
                let Some(name) = parts.get(1) else {
                    warn_line("Usage: match <parent>");
                    continue;
                };
                let parent = GameplayTag::new(name);
                let set = cluster.authority().set();
                step(&format!(
                    "{}: matching={} total={}",
                    parent,
                    set.has_matching_tag(&parent),
                    set.matching_stack_count(&parent)
                ));
                Ok(())
            }

            "stats" => {
                show_observer_stats(&cluster);
                convergence_result(cluster.is_converged());
                Ok(())
            }

            "help" | "h" | "?" => {
                print_help();
                Ok(())
            }

            "quit" | "exit" | "q" => break,

            other => {
                println!(
                    "  {} Unknown command '{}', type 'help'",
                    "?".bright_yellow(),
                    other
                );
                Ok(())
            }
        };

        if let Err(err) = result {
            warn_line(&err.to_string());
        }
    }
}

// ─── Entry point ───────────────────────────────────────────────────────────

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Demo => run_demo(),
        Commands::Lossy {
            loss,
            ticks,
            observers,
            seed,
        } => run_lossy(loss.clamp(0.0, 1.0), ticks, observers, seed),
        Commands::Interactive => {
            run_interactive();
            Ok(())
        }
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "replication failed");
        std::process::exit(1);
    }
}
