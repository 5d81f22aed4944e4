use std::process::ExitCode;

mod auth;
mod commands;
mod config;
mod draft;
mod error;
mod http_client;
mod media;
mod output;
mod server;

use config::{Command, Config};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = config::parse();

    let config = match Config::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => return ExitCode::from(output::emit(Err(e)) as u8),
    };

    // Logs go to stderr; stdout carries exactly one JSON envelope per command
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Command::Serve {
            host,
            port,
            api_key,
        } => match server::serve(&config, &host, port, api_key).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("server failed: {e:#}");
                ExitCode::FAILURE
            }
        },
        Command::Config { action } => {
            ExitCode::from(output::emit(commands::config_command(&config, action)) as u8)
        }
        Command::Token { action } => {
            ExitCode::from(output::emit(commands::token_command(&config, action).await) as u8)
        }
        Command::Media { action } => {
            ExitCode::from(output::emit(commands::media_command(&config, action).await) as u8)
        }
        Command::Draft { action } => {
            ExitCode::from(output::emit(commands::draft_command(&config, action).await) as u8)
        }
    }
}
