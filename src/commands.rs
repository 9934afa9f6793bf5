use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::cli::output::LogSink;
use crate::config::{ClientSettings, BIN_OVERRIDE_ENV};
use crate::launcher::BinaryResolver;
use crate::session::{SessionManager, StopHandle};
use crate::utils::error::ClientError;

/// Request a stop on Ctrl-C, or on SIGTERM/SIGHUP on unix. The returned task
/// must be aborted only once the session has been deactivated.
fn stop_on_signal(stop: StopHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(signal) = shutdown_signal().await {
            tracing::debug!("{signal} received, stopping session");
            stop.request_stop();
        }
    })
}

#[cfg(unix)]
async fn shutdown_signal() -> Option<&'static str> {
    use tokio::signal::unix::{signal, Signal, SignalKind};

    async fn recv(signal: Option<&mut Signal>) -> Option<()> {
        match signal {
            Some(signal) => signal.recv().await,
            None => std::future::pending().await,
        }
    }

    let mut terminate = signal(SignalKind::terminate()).ok();
    let mut hangup = signal(SignalKind::hangup()).ok();
    tokio::select! {
        Ok(()) = tokio::signal::ctrl_c() => Some("SIGINT"),
        Some(()) = recv(terminate.as_mut()) => Some("SIGTERM"),
        Some(()) = recv(hangup.as_mut()) => Some("SIGHUP"),
        else => None,
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Option<&'static str> {
    tokio::signal::ctrl_c().await.ok().map(|()| "Ctrl-C")
}

/// Activate, mapping failures to the message the user sees. `Ok(false)`
/// means the activation was cancelled before the server came up.
async fn start(manager: &mut SessionManager) -> Result<bool> {
    match manager.activate().await {
        Ok(()) => Ok(true),
        Err(ClientError::ActivationCancelled { .. }) => Ok(false),
        Err(e) => anyhow::bail!("Verse language server unavailable: {e}"),
    }
}

async fn finish(manager: &mut SessionManager) {
    if let Err(e) = manager.deactivate().await {
        // Already reported on the output channel.
        tracing::debug!("Deactivation finished with {e} (fatal: {})", e.is_fatal());
    }
}

fn print_candidate(label: &str, path: Option<&Path>) {
    match path {
        Some(path) if !path.as_os_str().is_empty() => println!("  {label:<18} {}", path.display()),
        _ => println!("  {label:<18} (not set)"),
    }
}

pub fn handle_resolve_command(settings: &ClientSettings) -> Result<()> {
    let resolver = BinaryResolver::host();
    let sources = settings.binary_sources(&resolver);

    println!("Platform: {}", resolver.platform());
    println!("Candidates, highest precedence first:");
    print_candidate(BIN_OVERRIDE_ENV, sources.env_override.as_deref());
    print_candidate("--server-binary", sources.configured.as_deref());
    print_candidate("default", Some(&sources.default));

    let (candidate, source) = resolver.candidate(&sources);
    println!("Selected ({source}): {}", candidate.display());

    let location = resolver.resolve(&sources)?;
    println!("Found {} ({})", location.path().display(), location.source());
    Ok(())
}

pub async fn handle_check_command(settings: ClientSettings, sink: LogSink) -> Result<()> {
    let mut manager = SessionManager::new(settings, sink);
    let signals = stop_on_signal(manager.stop_handle());
    let started = start(&mut manager).await;

    if matches!(started, Ok(true)) {
        if let Some(session) = manager.session() {
            let result = session.server_info();
            match &result.server_info {
                Some(info) => println!(
                    "Server: {} {}",
                    info.name,
                    info.version.as_deref().unwrap_or("(no version)")
                ),
                None => println!("Server: (no serverInfo)"),
            }
            println!("State: {}", manager.state());
            println!("Workspace: {}", manager.settings().workspace_root.display());
            if let Some(staged) = manager.staging_path() {
                println!("Staged binary: {}", staged.display());
            }
            println!("Document selector: {}", session.filter().to_json());
            println!("Capabilities:");
            for name in result.capability_names() {
                println!("  {name}");
            }
        }
        finish(&mut manager).await;
    }

    signals.abort();
    started.map(|_| ())
}

pub async fn handle_run_command(
    settings: ClientSettings,
    sink: LogSink,
    files: &[PathBuf],
) -> Result<()> {
    let mut manager = SessionManager::new(settings, sink);
    let stop = manager.stop_handle();
    let signals = stop_on_signal(stop.clone());
    match start(&mut manager).await {
        Ok(true) => {}
        other => {
            signals.abort();
            return other.map(|_| ());
        }
    }

    let server_exited = match manager.session() {
        Some(session) => {
            for file in files {
                match session.open_document(file).await {
                    Ok(true) => println!("Opened {}", file.display()),
                    Ok(false) => {}
                    Err(e) => manager.sink().warn(format!("Could not open {}: {e}", file.display())),
                }
            }
            match session.watch_root() {
                Some(root) => println!("Forwarding changes under {}", root.display()),
                None => println!(
                    "File changes are not being forwarded (see the {} output).",
                    manager.sink().name()
                ),
            }
            println!(
                "Session active (server copy: {}); press Ctrl-C to stop.",
                session.staged_path().display()
            );

            tokio::select! {
                () = session.closed() => true,
                () = stop.stopped() => false,
            }
        }
        None => false,
    };

    if server_exited {
        manager.sink().error("Verse language server exited unexpectedly.");
    }
    finish(&mut manager).await;
    signals.abort();

    if server_exited {
        anyhow::bail!("Verse language server exited unexpectedly");
    }
    Ok(())
}
