//! Studio operator console entry point.
//!
//! ## Runtime note
//!
//! The provider client is `reqwest::blocking`. It is built on the blocking
//! pool and every call goes through `tokio::task::spawn_blocking`, so the
//! async runtime threads never block on the network.

mod cli;
mod commands;
mod settings;
mod state;
mod views;

use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Screen};
use settings::{default_settings_path, load_settings};
use state::AppState;

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "studio=debug,studio_core=debug"
    } else {
        "studio=info,studio_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    let app_settings = load_settings(&settings_path);
    info!(
        settings_path = ?settings_path,
        thinking_mode = app_settings.thinking_mode,
        live_voice = %app_settings.live_voice,
        "settings loaded"
    );

    let state =
        tokio::task::spawn_blocking(move || AppState::new(app_settings, settings_path)).await??;

    match cli.screen {
        Screen::Dashboard => views::dashboard(&state),
        Screen::Chat(args) => views::chat(&state, args).await?,
        Screen::Image(command) => views::image(&state, command).await?,
        Screen::Video(command) => views::video(&state, command).await?,
        Screen::Live(args) => views::live(&state, args.device).await?,
        Screen::Ground(command) => views::ground(&state, command).await?,
        Screen::Transcribe(args) => views::transcribe(&state, args).await?,
        Screen::Speak(args) => views::speak(&state, args).await?,
        Screen::Devices => views::devices(),
        Screen::Settings { action } => views::settings(&state, action)?,
    }

    for (operation, latency) in state.request_summary() {
        info!(
            operation,
            calls = latency.calls,
            failures = latency.failures,
            median_ms = latency.median_ms,
            p95_ms = latency.p95_ms,
            "request latency"
        );
    }

    // The blocking client owns a runtime thread; release it off the async workers.
    tokio::task::spawn_blocking(move || drop(state)).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
