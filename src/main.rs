use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shiftbot::bootstrap;
use shiftbot::Config;

#[derive(Parser)]
#[command(name = "shiftbot", version, about = "Conversational shift-job matching bot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the bot (default).
    Run,
    /// Run pending database migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; real deployments set the environment directly.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::resolve()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let engine = bootstrap::build_engine(&config).await?;
            engine.run().await?;
        }
        Command::Migrate => {
            let store = bootstrap::open_store(&config).await?;
            store.run_migrations().await?;
            tracing::info!("migrations complete");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("shiftbot=info,warn"));
    let json = std::env::var("SHIFTBOT_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
