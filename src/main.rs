//! Lampstand - Bible study chat CLI
//!
#![doc = "Main entry point for the Lampstand application."]

use anyhow::Result;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lampstand::chat::metrics::init_metrics_exporter;
use lampstand::cli::{Cli, Commands};
use lampstand::commands::{self, chat::ChatOptions, Services};
use lampstand::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);
    init_metrics_exporter();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Chat {
            book,
            resume,
            translation,
            offline,
        } => {
            tracing::info!("Starting interactive chat");
            if let Some(b) = &book {
                tracing::debug!("Scoping chat to book: {}", b);
            }
            if let Some(r) = &resume {
                tracing::debug!("Resuming conversation: {}", r);
            }

            let options = ChatOptions {
                user: cli.user,
                book,
                resume,
                translation,
                offline,
            };
            commands::chat::run_chat(config, options).await?;
            Ok(())
        }
        Commands::History { command } => {
            tracing::info!("Starting history command");
            let services = Services::from_config(&config)?;
            commands::history::handle_history(&services, &cli.user, command).await?;
            Ok(())
        }
        Commands::Quota => {
            let services = Services::from_config(&config)?;
            commands::quota::show_quota(&services, &cli.user).await?;
            Ok(())
        }
        Commands::Auth { clear } => {
            commands::auth::authenticate(clear)?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so streamed replies on stdout stay clean.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose {
        "lampstand=debug"
    } else {
        "lampstand=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
