//! townchat CLI entry point

use clap::Parser;
use std::time::Duration;
use tracing::info;

use townchat_cli::{ChatApp, Cli, CliAppConfig, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = CliAppConfig::load(cli.config.as_deref())?.with_overrides(
        cli.server.clone(),
        cli.token.clone(),
        cli.verbose,
    )?;

    setup_logging(config.cli.verbose);

    match cli.command {
        Commands::Config { example } => {
            if example {
                println!("{}", CliAppConfig::example_config());
            } else {
                println!("{}", config.to_toml()?);
            }
        }
        Commands::Chat {
            conversation,
            local_echo,
        } => {
            let mut config = config;
            config.session.local_echo |= local_echo;
            ChatApp::new(config).run_chat(&conversation).await?;
        }
        Commands::History {
            conversation,
            json,
            wait_secs,
        } => {
            ChatApp::new(config)
                .run_history(&conversation, json, Duration::from_secs(wait_secs))
                .await?;
        }
    }

    info!("townchat exited");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    // stdout carries the conversation
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
