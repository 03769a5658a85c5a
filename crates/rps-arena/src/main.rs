use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rps_arena::bot::BotExecutionSpec;
use rps_arena::bracket::{seed_entrants, MatchState};
use rps_arena::config::ArenaConfig;
use rps_arena::events::{EventSink, TournamentEvent};
use rps_arena::orchestrator::Tournament;
use rps_arena::registry::{BotRegistry, InMemoryRegistry};
use rps_arena::resolver::{CancelFlag, MatchResolver};
use rps_arena::sandbox::{test_bot, SandboxExecutor};

#[derive(Parser)]
#[command(name = "rps-arena")]
#[command(about = "Rock-paper-scissors bot tournaments")]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "arena.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a tournament between every configured bot
    Run {
        /// Print every event as a JSON line
        #[arg(long)]
        events: bool,
    },
    /// Run a single bot once and show what it did
    Test {
        /// Bot name
        bot: String,
        /// Stdin record to send instead of the sample one
        #[arg(long)]
        stdin: Option<String>,
    },
    /// List configured bots
    Bots,
}

/// Writes events to stdout, one JSON object per line.
struct JsonLines;

impl EventSink for JsonLines {
    fn publish(&self, event: TournamentEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::error!("Failed to encode event: {}", e),
        }
    }
}

/// Drops every event.
struct Discard;

impl EventSink for Discard {
    fn publish(&self, _event: TournamentEvent) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ArenaConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let registry = Arc::new(InMemoryRegistry::from_config(&config)?);
    let executor = Arc::new(SandboxExecutor::new(&config.sandbox)?);

    match cli.command {
        Commands::Run { events } => {
            let mut entrants = registry.active_bots();
            seed_entrants(&mut entrants, &mut rand::thread_rng());

            let id = uuid::Uuid::new_v4().to_string();
            let mut tournament = Tournament::from_entrants(id, entrants)?;
            let resolver = MatchResolver::new(executor, registry.clone(), &config.tournament);

            let cancel = CancelFlag::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Cancelling tournament...");
                    on_ctrl_c.cancel();
                }
            });

            let sink: &dyn EventSink = if events { &JsonLines } else { &Discard };
            let summary = tournament.run(&resolver, sink, &cancel).await;

            if !events {
                for m in tournament.matches() {
                    if m.state != MatchState::Finished {
                        continue;
                    }
                    let line: Vec<String> = m
                        .participants
                        .iter()
                        .map(|p| {
                            let mark = if p.is_winner == Some(true) { "*" } else { " " };
                            format!("{}{} {}", mark, p.bot.name, p.result_text.join(""))
                        })
                        .collect();
                    println!("[round {}] {}", m.tournament_round_text, line.join("  vs  "));
                    if let Some(note) = &m.note {
                        println!("           ({})", note);
                    }
                }
                println!();
            }

            match &summary.winner {
                Some(winner) => println!("Winner: {}", winner),
                None if summary.cancelled => println!("Tournament cancelled"),
                None => println!("No winner"),
            }
            println!(
                "{} matches played, {} decided by coin flip",
                summary.matches_played, summary.coin_flips
            );
        }
        Commands::Test { bot, stdin } => {
            let found = registry
                .find(&bot)
                .with_context(|| format!("Bot not found: {}", bot))?;
            let code = registry.code(found.id)?;
            let spec = BotExecutionSpec::new(&found, code);

            let result = test_bot(executor.as_ref(), &spec, stdin).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Bots => {
            for bot in registry.all_bots() {
                println!("{:>3}  {:<30}  {:?}", bot.id, bot.name, bot.run_type);
            }
        }
    }

    Ok(())
}
