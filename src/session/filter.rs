use globset::{Glob, GlobMatcher};
use std::path::Path;
use url::Url;

use crate::lsp::protocol::path_to_file_uri;
use crate::utils::error::{ClientError, ClientResult};

pub const VERSE_LANGUAGE_ID: &str = "verse";
pub const VERSE_EXTENSION: &str = "verse";
pub const VERSE_WATCH_GLOB: &str = "**/*.verse";

/// Which documents the session manages: `{ scheme, language }`.
#[derive(Clone, Debug)]
pub struct DocumentFilter {
    scheme: &'static str,
    language: &'static str,
    extension: &'static str,
}

impl DocumentFilter {
    pub fn verse() -> Self {
        Self { scheme: "file", language: VERSE_LANGUAGE_ID, extension: VERSE_EXTENSION }
    }

    pub fn language(&self) -> &str {
        self.language
    }

    /// Language id for a path on disk, by extension.
    pub fn language_of(&self, path: &Path) -> Option<&'static str> {
        let ext = path.extension()?.to_str()?;
        ext.eq_ignore_ascii_case(self.extension).then_some(self.language)
    }

    pub fn matches(&self, uri: &Url, language_id: &str) -> bool {
        uri.scheme() == self.scheme && language_id == self.language
    }

    /// The document URI if the file at `path` is selected by this filter.
    pub fn select(&self, path: &Path) -> Option<Url> {
        let language = self.language_of(path)?;
        let uri = path_to_file_uri(path)?;
        self.matches(&uri, language).then_some(uri)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "scheme": self.scheme, "language": self.language })
    }
}

/// Glob the file-system watcher reports changes for, relative to the
/// workspace root.
#[derive(Clone, Debug)]
pub struct WatchPattern {
    pattern: String,
    matcher: GlobMatcher,
}

impl WatchPattern {
    pub fn new(pattern: &str) -> ClientResult<Self> {
        let glob = Glob::new(pattern)
            .map_err(|e| ClientError::Watch(format!("invalid pattern {pattern}: {e}")))?;
        Ok(Self { pattern: pattern.to_string(), matcher: glob.compile_matcher() })
    }

    pub fn verse() -> ClientResult<Self> {
        Self::new(VERSE_WATCH_GLOB)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, root: &Path, path: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);
        self.matcher.is_match(relative)
    }
}
