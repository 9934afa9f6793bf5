use clap::builder::styling::{AnsiColor, Styles};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().bold())
    .literal(AnsiColor::Cyan.on_default().bold())
    .placeholder(AnsiColor::Cyan.on_default())
    .error(AnsiColor::Red.on_default().bold());

const AFTER_HELP: &str = "\x1b[1;32mQuick Reference:\x1b[0m
  \x1b[1;36mFind out which server binary would run\x1b[0m:
    verse-lsp-client resolve                     Show candidates and the chosen path
    verse-lsp-client --flavor Development resolve

  \x1b[1;36mTalk to the server\x1b[0m:
    verse-lsp-client check                       Start, handshake, print capabilities, stop
    verse-lsp-client run src/game.verse          Keep a session open until Ctrl-C

  \x1b[1;36mEnvironment\x1b[0m:
    VERSE_LSP_CE_BIN=/path/to/server             Overrides every other binary source
    VERSE_LSP_CE_DEV_SHOW_OUTPUT=1               Show the output channel from startup";

#[derive(Parser)]
#[command(name = "verse-lsp-client")]
#[command(about = "Launch and manage a Verse language server session over stdio")]
#[command(version)]
#[command(styles = STYLES)]
#[command(after_help = AFTER_HELP)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root (defaults to the nearest directory with a .vproject file)
    #[arg(long, value_name = "DIR", global = true)]
    pub workspace: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Server binary to use when VERSE_LSP_CE_BIN is not set
    #[arg(long, value_name = "PATH", global = true)]
    pub server_binary: Option<PathBuf>,

    /// Root the default `dist/bin/...` path is computed from
    #[arg(long, value_name = "DIR", global = true)]
    pub install_root: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = BuildFlavor::Shipping, global = true)]
    pub flavor: BuildFlavor,

    /// Seconds to wait for the initialize response (default: 30)
    #[arg(long, value_name = "SECONDS", global = true)]
    pub handshake_timeout: Option<u64>,

    /// Seconds to wait for the server to exit after shutdown (default: 2)
    #[arg(long, value_name = "SECONDS", global = true)]
    pub shutdown_timeout: Option<u64>,

    /// When the output channel is shown on the terminal
    #[arg(long, value_enum, default_value_t = RevealOutput::Error, global = true)]
    pub reveal_output: RevealOutput,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show which server binary would be launched and why
    #[command(
        long_about = "Run the binary resolver only. Prints the platform tag, every candidate \
        source in precedence order (VERSE_LSP_CE_BIN, --server-binary, computed default) and \
        the path that wins. Exits with an error when the chosen file does not exist."
    )]
    Resolve,

    /// Start the server, complete the handshake, print its capabilities, stop it
    #[command(
        long_about = "Start a full session: resolve, stage, launch, handshake. Prints the \
        server's name, version and capability keys, then shuts the session down and removes \
        the staged binary.\n\n\
        Examples:\n  \
        verse-lsp-client check\n  \
        verse-lsp-client --server-binary ./target/debug/verse-lsp check"
    )]
    Check,

    /// Keep a session open, syncing the given documents and watched files
    #[command(
        long_about = "Start a session and keep it running until Ctrl-C or until the server \
        exits. Files passed as arguments are opened if they match the document selector \
        (file scheme, language `verse`). Changes to `**/*.verse` under the workspace are \
        forwarded to the server.\n\n\
        Examples:\n  \
        verse-lsp-client run\n  \
        verse-lsp-client run Content/player.verse Content/game.verse"
    )]
    Run {
        /// Documents to open once the session is active
        files: Vec<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BuildFlavor {
    #[value(name = "Shipping")]
    Shipping,
    #[value(name = "Development")]
    Development,
    #[value(name = "Debug")]
    Debug,
}

impl BuildFlavor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shipping => "Shipping",
            Self::Development => "Development",
            Self::Debug => "Debug",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum RevealOutput {
    Never,
    #[default]
    Error,
    Always,
}
