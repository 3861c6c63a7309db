//! Spinwise operator CLI

use clap::{Parser, Subcommand};
use spinwise::{config, ConfigLoader, EngineResult, SlotEngine};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "spinwise")]
#[command(about = "Weighted slot engine with exact RTP analysis")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the exact RTP report for the configured table
    Report,

    /// Run a Monte Carlo simulation and compare it with the exact RTP
    Simulate {
        #[arg(short, long, default_value = "10000")]
        spins: u64,

        #[arg(short, long, default_value = "1")]
        wager: u64,
    },

    /// Open a session and spin it
    Play {
        /// Starting balance; defaults to `game.initial_credits`
        #[arg(short, long)]
        credits: Option<u64>,

        #[arg(short, long, default_value = "10")]
        wager: u64,

        #[arg(short, long, default_value = "10")]
        spins: u64,
    },

    /// Remove expired session snapshots and exit
    Sweep,

    /// Write the default configuration to a file
    SampleConfig { path: PathBuf },
}

#[tokio::main]
async fn main() -> EngineResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spinwise=info".into()),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::SampleConfig { path } = &cli.command {
        config::generate_sample_config(path)?;
        println!("Sample configuration written to {}", path.display());
        return Ok(());
    }

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;
    let engine = SlotEngine::builder(config).without_reaper().build().await?;

    let result = match cli.command {
        Commands::Report => print_report(&engine),
        Commands::Simulate { spins, wager } => run_simulation(&engine, spins, wager).await,
        Commands::Play { credits, wager, spins } => play(&engine, credits, wager, spins).await,
        Commands::Sweep => {
            let report = engine.sweep_expired().await;
            println!(
                "Scanned {} sessions, removed {}, failed {}",
                report.scanned, report.removed, report.failed
            );
            Ok(())
        }
        Commands::SampleConfig { .. } => Ok(()),
    };

    engine.shutdown().await;
    result
}

fn print_report(engine: &SlotEngine) -> EngineResult<()> {
    let snapshot = engine.probability_snapshot();
    let report = engine.rtp_report();

    let short_fingerprint = snapshot.fingerprint.get(..12).unwrap_or(&snapshot.fingerprint);
    println!("Table version {} ({})", snapshot.version, short_fingerprint);
    println!("Reels: {}  Outcomes: {}", snapshot.reel_count, report.combinations);
    println!("Theoretical RTP: {:.4}%", report.theoretical_rtp);
    println!("Win probability: {:.4}%", report.win_probability);
    println!();
    println!(
        "{:<8} {:>6} {:>10} {:>6} {:>12} {:>5}",
        "Symbol", "Weight", "Prob", "Mult", "Contribution", "Rank"
    );
    for s in &report.symbols {
        println!(
            "{:<8} {:>6} {:>9.3}% {:>6} {:>12.4} {:>5}",
            s.symbol,
            s.weight,
            s.probability * 100.0,
            s.payout_multiplier,
            s.expected_contribution,
            s.frequency_rank
        );
    }
    println!();
    for (count, probability) in &report.match_probabilities {
        println!("{}-of-a-kind: {:.4}%", count, probability);
    }
    Ok(())
}

async fn run_simulation(engine: &SlotEngine, spins: u64, wager: u64) -> EngineResult<()> {
    let report = engine.simulate(spins, wager).await?;
    println!("Spins: {}  Wager: {}", report.spins, report.wager);
    println!(
        "Total bet: {}  Total payout: {}  Net: {}",
        report.total_bet, report.total_payout, report.net_result
    );
    println!("Win rate: {:.3}%  Biggest win: {}", report.win_rate, report.biggest_win);
    println!(
        "RTP: {:.3}% simulated vs {:.3}% exact (difference {:.3})",
        report.actual_rtp, report.theoretical_rtp, report.rtp_difference
    );
    for (tier, count) in &report.tier_histogram {
        println!("  x{:<5} {}", tier, count);
    }
    Ok(())
}

async fn play(
    engine: &SlotEngine,
    credits: Option<u64>,
    wager: u64,
    spins: u64,
) -> EngineResult<()> {
    let session = match credits {
        Some(credits) => engine.create_session(credits).await?,
        None => engine.create_default_session().await?,
    };
    info!(session_id = %session.id, "Playing");

    for _ in 0..spins {
        let spin = engine.apply_spin(&session.id, wager).await?;
        println!(
            "{}  payout {:>5}  credits {:>6}",
            spin.outcome.symbols.join(" "),
            spin.payout,
            spin.session.credits
        );
        if !spin.session.active {
            println!("Out of credits");
            break;
        }
        if spin.session.credits < wager {
            println!("Balance below wager");
            break;
        }
    }

    let session = engine.get_session(&session.id).await?;
    println!(
        "Session {}: {} spins, {} wagered, {} won, RTP {:.2}%",
        session.id,
        session.total_spins,
        session.total_wagered,
        session.total_winnings,
        session.rtp()
    );
    Ok(())
}
