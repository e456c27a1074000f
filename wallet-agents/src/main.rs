use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::json;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use wallet_agents::{
    AppConfig, FindingStatus, MultiAgentSystem, OverallAction, Recommendation, WalletRequest,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze one wallet and print the recommendation
    Analyze {
        /// Solana wallet address
        #[arg(long)]
        wallet: String,

        /// Token symbol for the social and market signals
        #[arg(long)]
        token: Option<String>,

        /// Free-form investor preferences
        #[arg(long)]
        preferences: Option<String>,

        /// Print the recommendation as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read queue-style messages from stdin, one JSON result per line
    Consume,
}

fn print_summary(recommendation: &Recommendation) {
    let action = recommendation.overall_action.to_string();
    let action = match recommendation.overall_action {
        OverallAction::Buy => action.green().bold(),
        OverallAction::Sell | OverallAction::Reduce => action.red().bold(),
        OverallAction::Hold => action.yellow().bold(),
        OverallAction::NoAction => action.dimmed(),
    };

    println!("\n{} {}", "Wallet:".bold(), recommendation.wallet_address);
    println!("{} {}", "Action:".bold(), action);
    println!("\n{}", "Signals:".bold());
    for finding in &recommendation.contributing_findings {
        let status = match finding.status {
            FindingStatus::Ok => "ok".green(),
            FindingStatus::PartialData => "partial".yellow(),
            FindingStatus::Failed => "failed".red(),
        };
        println!(
            "  {:<10} [{}] score {:+.2} conf {:.2}  {}",
            finding.agent_kind.to_string(),
            status,
            finding.score,
            finding.confidence,
            finding.summary
        );
    }
    println!("\n{}\n{}", "Rationale:".bold(), recommendation.rationale);
}

async fn analyze_once(system: &MultiAgentSystem, request: WalletRequest, as_json: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let recommendation = system
        .process_request_with_cancel(request, &cancel)
        .await
        .context("analysis failed")?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&recommendation)?);
    } else {
        print_summary(&recommendation);
    }
    Ok(())
}

async fn consume(system: &MultiAgentSystem) -> Result<()> {
    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let output = match WalletRequest::from_message(&line) {
            Ok(request) => match system.process_request_with_cancel(request, &shutdown).await {
                Ok(recommendation) => serde_json::to_value(&recommendation)?,
                Err(err) => {
                    error!(error = %err, "Request failed");
                    json!({ "error": err.to_string() })
                }
            },
            Err(err) => json!({ "error": err.to_string() }),
        };
        println!("{}", output);
    }

    info!("Consumer stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wallet_agents=info,common=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env().context("invalid configuration")?;
    let system = MultiAgentSystem::from_config(&config).context("failed to initialize agents")?;
    info!("Wallet insights system initialized");

    match args.command {
        Command::Analyze {
            wallet,
            token,
            preferences,
            json,
        } => {
            let mut request = WalletRequest::new(wallet, preferences.as_deref());
            if let Some(token) = token {
                request = request.with_token(token);
            }
            analyze_once(&system, request, json).await
        }
        Command::Consume => consume(&system).await,
    }
}
