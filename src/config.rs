use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::args::{BuildFlavor, Cli, RevealOutput};
use crate::launcher::resolver::{BinaryResolver, BinarySources};

pub const BIN_OVERRIDE_ENV: &str = "VERSE_LSP_CE_BIN";
pub const DEV_SHOW_OUTPUT_ENV: &str = "VERSE_LSP_CE_DEV_SHOW_OUTPUT";

/// Name of the output channel and of the client towards the server.
pub const CHANNEL_NAME: &str = "VerseLspCE";
pub const CLIENT_ID: &str = "verse_ce";

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything the session needs from the host, read once at startup.
#[derive(Clone, Debug)]
pub struct ClientSettings {
    pub env_override: Option<PathBuf>,
    pub configured_binary: Option<PathBuf>,
    pub install_root: PathBuf,
    pub flavor: BuildFlavor,
    pub workspace_root: PathBuf,
    pub handshake_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub reveal_output: RevealOutput,
    pub dev_show_output: bool,
}

impl ClientSettings {
    pub fn from_cli(cli: &Cli, workspace_root: PathBuf) -> Self {
        Self::from_parts(cli, workspace_root, |key| std::env::var(key).ok())
    }

    /// `env` looks up an environment variable; split out so tests don't touch
    /// the process environment.
    pub fn from_parts(
        cli: &Cli,
        workspace_root: PathBuf,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let dev_show_output = env(DEV_SHOW_OUTPUT_ENV).as_deref() == Some("1");
        let reveal_output =
            if dev_show_output { RevealOutput::Always } else { cli.reveal_output };

        Self {
            env_override: env(BIN_OVERRIDE_ENV).filter(|v| !v.is_empty()).map(PathBuf::from),
            configured_binary: cli.server_binary.clone(),
            install_root: cli.install_root.clone().unwrap_or_else(default_install_root),
            flavor: cli.flavor,
            workspace_root,
            handshake_timeout: cli
                .handshake_timeout
                .map_or(DEFAULT_HANDSHAKE_TIMEOUT, Duration::from_secs),
            shutdown_timeout: cli
                .shutdown_timeout
                .map_or(DEFAULT_SHUTDOWN_TIMEOUT, Duration::from_secs),
            reveal_output,
            dev_show_output,
        }
    }

    /// Settings for a fixed binary with no environment involved.
    pub fn for_binary(binary: impl Into<PathBuf>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            env_override: None,
            configured_binary: Some(binary.into()),
            install_root: default_install_root(),
            flavor: BuildFlavor::Shipping,
            workspace_root: workspace_root.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            reveal_output: RevealOutput::Never,
            dev_show_output: false,
        }
    }

    pub fn binary_sources(&self, resolver: &BinaryResolver) -> BinarySources {
        BinarySources {
            env_override: self.env_override.clone(),
            configured: self.configured_binary.clone(),
            default: resolver.default_path(&self.install_root, self.flavor),
        }
    }
}

/// Directory holding the running executable; `dist/bin/...` hangs off it.
fn default_install_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}
