mod manifest;

use clap::{Parser, Subcommand};
use levelflow_common::ConnectionId;
use levelflow_stream::{BodyRegistry, FlushMode, ReferenceSweeper, StreamConfig, StreamingHost, TickBudget};
use levelflow_travel::{
    NetSession, StandardHooks, TransitionState, TravelEvent, TravelHost, TravelUrl, WorldTransitionController,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::manifest::PackageManifest;

/// Simulated seconds per CLI tick.
const TICK_SECONDS: f64 = 1.0 / 30.0;

#[derive(Parser)]
#[command(name = "levelflow-cli", about = "Drive a world manifest through level streaming and seamless travel")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and the default streaming configuration
    Info,
    /// Tick the start world's streaming levels and report progress
    Stream {
        /// World manifest (YAML)
        #[arg(short, long)]
        manifest: PathBuf,
        /// Number of ticks to run
        #[arg(short, long, default_value = "20")]
        ticks: u64,
        /// Activation steps per tick; the manifest's budget is used when omitted
        #[arg(short, long)]
        budget_steps: Option<u32>,
    },
    /// Seamlessly travel from the start world to another map
    Travel {
        /// World manifest (YAML)
        #[arg(short, long)]
        manifest: PathBuf,
        /// Destination URL, e.g. `Hangar?Name=Ash`
        #[arg(long)]
        to: String,
        /// Hold at the transition world for this many ticks before resuming
        #[arg(long)]
        pause_ticks: Option<u64>,
        /// Give up after this many ticks
        #[arg(long, default_value = "100")]
        max_ticks: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("levelflow-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", levelflow_common::crate_info());
            println!("kernel: {}", levelflow_kernel::crate_info());
            println!("stream: {}", levelflow_stream::crate_info());
            println!("travel: {}", levelflow_travel::crate_info());
            println!("default transition map: {}", TravelUrl::DEFAULT_TRANSITION_MAP);
            println!("default streaming config:");
            print!("{}", serde_yaml::to_string(&StreamConfig::default())?);
        }
        Commands::Stream {
            manifest,
            ticks,
            budget_steps,
        } => {
            let manifest = PackageManifest::load(&manifest)?;
            let mut ctx = manifest.context()?;
            let mut loader = manifest.loader();
            let mut physics = BodyRegistry::new();
            let mut net = manifest.session();
            let budget = budget_steps.map_or(ctx.streaming.config().time_budget, TickBudget::steps);
            println!(
                "Streaming {}: {} levels, budget {budget:?}",
                ctx.world.name(),
                ctx.streaming.descriptors().len()
            );

            for tick in 1..=ticks {
                ctx.world.step(TICK_SECONDS);
                loader.poll();
                let stats = {
                    let mut host = StreamingHost::new(&mut loader, &mut physics, &mut net);
                    ctx.streaming.tick(&mut ctx.world, &mut host, &manifest.viewers, budget)
                };
                let active = ctx
                    .streaming
                    .mid_activation()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "tick {tick:>3}: loads={} steps={} visible={} loaded={} activating={active}",
                    stats.loads_requested_this_tick, stats.steps_this_tick, stats.visible_levels, stats.loaded_levels
                );
                if ctx.streaming.gc_requested() {
                    let collected = ctx
                        .streaming
                        .collect_garbage(&mut ctx.world, &mut ReferenceSweeper, &mut net);
                    if collected.levels_freed > 0 {
                        println!(
                            "          collected {:?} ({} actors, {} refs nulled)",
                            collected.packages, collected.actors_freed, collected.refs_nulled
                        );
                    }
                }
            }

            for level in ctx.streaming.stalled_levels() {
                println!("stalled: {level}");
            }
            println!(
                "active levels after {:.2}s: {:?}",
                ctx.world.time_seconds(),
                ctx.world.active_levels()
            );
            println!("average tick: {:?}", ctx.streaming.timer().average());
        }
        Commands::Travel {
            manifest,
            to,
            pause_ticks,
            max_ticks,
        } => {
            let manifest = PackageManifest::load(&manifest)?;
            let mut ctx = manifest.context()?;
            let mut loader = manifest.loader();
            let mut physics = BodyRegistry::new();
            let mut net = manifest.session();
            let mut hooks = StandardHooks::new();
            let mut travel = WorldTransitionController::with_transition_map(manifest.transition_map.clone());

            {
                let mut host = StreamingHost::new(&mut loader, &mut physics, &mut net);
                ctx.streaming
                    .flush(&mut ctx.world, &mut host, &manifest.viewers, FlushMode::Full)?;
            }
            println!("Start: {} (active levels {:?})", ctx.world.name(), ctx.world.active_levels());

            let url = TravelUrl::parse(&to)?;
            tracing::info!(from = %ctx.world.name(), to = %url, "starting travel");
            travel.start_travel(&ctx, url, None, &mut loader)?;
            if pause_ticks.is_some() {
                travel.set_pause_at_midpoint(true, &mut loader);
            }

            let mut paused_for = 0;
            let mut outcome = None;
            for tick in 1..=max_ticks {
                ctx.world.step(TICK_SECONDS);
                loader.poll();
                let events = {
                    let mut host = TravelHost::new(&mut loader, &mut physics, &mut net, &mut hooks);
                    travel.tick(&mut ctx, &mut host)
                };
                for event in &events {
                    tracing::info!(tick, ?event, "travel event");
                }
                if let Some(event) = events
                    .into_iter()
                    .find(|e| matches!(e, TravelEvent::Completed { .. } | TravelEvent::Failed { .. }))
                {
                    outcome = Some(event);
                    break;
                }
                if let Some(limit) = pause_ticks {
                    if *travel.state() == TransitionState::PausedAtMidpoint {
                        paused_for += 1;
                        if paused_for >= limit {
                            travel.resume(&mut loader)?;
                        }
                    }
                }
            }

            match outcome {
                Some(TravelEvent::Completed { world }) => {
                    let mut host = StreamingHost::new(&mut loader, &mut physics, &mut net);
                    ctx.streaming
                        .flush(&mut ctx.world, &mut host, &manifest.viewers, FlushMode::Full)?;
                    println!(
                        "Arrived at {world} after {:.2}s: {} actors, active levels {:?}",
                        ctx.world.time_seconds(),
                        ctx.world.persistent().actor_count(),
                        ctx.world.active_levels()
                    );
                }
                Some(TravelEvent::Failed { error }) => {
                    anyhow::bail!("travel failed: {error}");
                }
                _ => anyhow::bail!("travel did not finish within {max_ticks} ticks"),
            }
            for conn in net.open_connections() {
                println!("peer {} visible levels {:?}", conn.id(), conn.visible_levels());
            }
            for (id, reason) in closed_peers(&net) {
                println!("peer {id} closed: {reason}");
            }
        }
    }

    Ok(())
}

fn closed_peers(net: &NetSession) -> Vec<(ConnectionId, String)> {
    net.connections()
        .filter_map(|c| c.close_reason().map(|r| (c.id(), r.to_string())))
        .collect()
}
