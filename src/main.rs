use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod launcher;
mod lsp;
mod session;
mod utils;
mod workspace;

use cli::args::{Cli, Commands};
use cli::output::LogSink;
use config::{ClientSettings, CHANNEL_NAME};
use workspace::detection::WorkspaceDetector;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose || std::env::var_os("RUST_LOG").is_some() {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("verse_lsp_client=debug"));
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    }

    let workspace_root = match &cli.workspace {
        Some(dir) => dir.clone(),
        None => {
            let cwd = std::env::current_dir().context("cannot read the current directory")?;
            WorkspaceDetector::find_workspace_root(&cwd).unwrap_or(cwd)
        }
    };
    let workspace_root = workspace_root
        .canonicalize()
        .with_context(|| format!("workspace {} does not exist", workspace_root.display()))?;

    let settings = ClientSettings::from_cli(&cli, workspace_root);
    let sink = LogSink::stderr(CHANNEL_NAME, settings.reveal_output);

    match cli.command {
        Commands::Resolve => commands::handle_resolve_command(&settings)?,
        Commands::Check => commands::handle_check_command(settings, sink).await?,
        Commands::Run { files } => commands::handle_run_command(settings, sink, &files).await?,
    }

    Ok(())
}
