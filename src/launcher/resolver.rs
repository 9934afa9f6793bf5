//! Works out which language server executable to run.
//!
//! Sources are tried in a fixed order: the `VERSE_LSP_CE_BIN` override, the
//! configured binary, then the computed default
//! `<install-root>/dist/bin/VerseLspCE-<Platform>-<Flavor>[.exe]`. Only the
//! winner is checked for existence; a missing file is not retried.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::cli::args::BuildFlavor;
use crate::utils::error::{ClientError, ClientResult};

pub const SERVER_NAME: &str = "VerseLspCE";

const EXE_SUFFIX: &str = ".exe";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlatformTag {
    Win64,
    Win32,
    Linux,
    Mac,
    Unknown,
}

impl PlatformTag {
    /// Map an OS/architecture pair (as in `std::env::consts`) to a tag.
    /// Total: anything unrecognised is `Unknown`.
    pub fn from_os_arch(os: &str, arch: &str) -> Self {
        match (os, arch) {
            ("windows", "x86_64") => Self::Win64,
            ("windows", _) => Self::Win32,
            ("linux", _) => Self::Linux,
            ("macos", _) => Self::Mac,
            _ => Self::Unknown,
        }
    }

    pub fn host() -> Self {
        Self::from_os_arch(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn is_windows(self) -> bool {
        matches!(self, Self::Win64 | Self::Win32)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Win64 => "Win64",
            Self::Win32 => "Win32",
            Self::Linux => "Linux",
            Self::Mac => "Mac",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append `.exe` unless the path already ends with it (case-insensitive).
pub fn ensure_exe_suffix(path: PathBuf) -> PathBuf {
    let has_suffix = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.to_ascii_lowercase().ends_with(EXE_SUFFIX));
    if has_suffix {
        return path;
    }
    let mut raw: OsString = path.into_os_string();
    raw.push(EXE_SUFFIX);
    PathBuf::from(raw)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinarySource {
    EnvOverride,
    Configuration,
    Default,
}

impl fmt::Display for BinarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::EnvOverride => "VERSE_LSP_CE_BIN",
            Self::Configuration => "configured binary",
            Self::Default => "default location",
        };
        f.write_str(label)
    }
}

/// Candidate paths in precedence order.
#[derive(Clone, Debug, Default)]
pub struct BinarySources {
    pub env_override: Option<PathBuf>,
    pub configured: Option<PathBuf>,
    pub default: PathBuf,
}

impl BinarySources {
    /// First non-empty candidate, or the computed default.
    pub fn select(&self) -> (PathBuf, BinarySource) {
        let non_empty = |p: &Option<PathBuf>| p.clone().filter(|p| !p.as_os_str().is_empty());
        if let Some(path) = non_empty(&self.env_override) {
            return (path, BinarySource::EnvOverride);
        }
        if let Some(path) = non_empty(&self.configured) {
            return (path, BinarySource::Configuration);
        }
        (self.default.clone(), BinarySource::Default)
    }
}

/// A resolved server executable. Only ever constructed for a file that
/// existed at resolution time.
#[derive(Clone, Debug)]
pub struct ServerBinaryLocation {
    path: PathBuf,
    source: BinarySource,
}

impl ServerBinaryLocation {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> BinarySource {
        self.source
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BinaryResolver {
    platform: PlatformTag,
}

impl BinaryResolver {
    pub fn new(platform: PlatformTag) -> Self {
        Self { platform }
    }

    pub fn host() -> Self {
        Self::new(PlatformTag::host())
    }

    pub fn platform(&self) -> PlatformTag {
        self.platform
    }

    pub fn default_path(&self, install_root: &Path, flavor: BuildFlavor) -> PathBuf {
        install_root
            .join("dist")
            .join("bin")
            .join(format!("{SERVER_NAME}-{}-{}", self.platform, flavor.as_str()))
    }

    /// The path that would be used, with platform suffixing applied, without
    /// touching the filesystem.
    pub fn candidate(&self, sources: &BinarySources) -> (PathBuf, BinarySource) {
        let (path, source) = sources.select();
        let path = if self.platform.is_windows() { ensure_exe_suffix(path) } else { path };
        (std::path::absolute(&path).unwrap_or(path), source)
    }

    pub fn resolve(&self, sources: &BinarySources) -> ClientResult<ServerBinaryLocation> {
        let (path, source) = self.candidate(sources);
        tracing::debug!("Resolved LSP server binary from {source}: {}", path.display());

        if !path.is_file() {
            return Err(ClientError::MissingBinary { path });
        }
        Ok(ServerBinaryLocation { path, source })
    }
}
