use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use warden::app_state::AppState;
use warden::http::setup_http_server;
use warden::init_telemetry;
use warden::settings::config::Settings;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Role-based access control grant service")]
#[clap(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Parser)]
enum Commands {
    /// Show current configuration and exit
    Config,
    /// Start the warden server (default)
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env.local first: dotenvy never overrides variables that are already set.
    dotenvy::from_filename(".env.local").ok();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::new().context("Failed to load settings")?;

    if let Some(Commands::Config) = cli.command {
        println!("{:#?}", settings);
        return Ok(());
    }

    init_telemetry::init_tracing(settings.debug)?;
    let app_state = AppState::new(settings).await?;

    let handle = setup_http_server(app_state.clone(), &app_state.settings.api.bind_address).await?;

    match handle.await {
        Ok(Ok(())) => {
            info!("All tasks are done");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("HTTP server stopped with an error: {:#}", e);
            Err(e)
        }
        Err(e) => Err(anyhow::anyhow!("HTTP server task panicked: {}", e)),
    }
}
