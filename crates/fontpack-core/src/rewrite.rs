//! Asset discovery and stylesheet rewriting.
//!
//! A single left-to-right scan finds every `url(http(s)://.../name.ext)`
//! occurrence, numbers it in first-seen order and replaces it with a
//! reference to the local file that will sit next to the stylesheet inside
//! the archive:
//!
//! ```text
//! a{url(http://x/f1.woff)}   ──►   a{url(./Roboto-0.woff)}
//! ```
//!
//! Relative, protocol-relative and extension-less URLs are left untouched.
//! Everything outside the matched `url(...)` tokens is copied byte-for-byte.

use std::sync::OnceLock;

use regex::Regex;

/// `url(` + absolute http(s) stem without `)` + `.` + ASCII word extension + `)`.
const ASSET_URL_PATTERN: &str = r"url\((https?://[^)]+)\.([A-Za-z0-9_]+)\)";

fn asset_url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(ASSET_URL_PATTERN).expect("asset URL pattern is valid"))
}

/// One remote resource discovered in a stylesheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetReference {
    /// Position in first-seen order, starting at 0.
    pub index: usize,
    /// Absolute URL of the resource.
    pub remote_url: String,
    /// Trailing extension token, without the dot.
    pub extension: String,
    /// Entry name inside the archive.
    pub local_filename: String,
}

impl AssetReference {
    /// Build the reference for the `index`-th match.
    pub fn new(archive_name: &str, index: usize, stem: &str, extension: &str) -> Self {
        Self {
            index,
            remote_url: format!("{stem}.{extension}"),
            extension: extension.to_string(),
            local_filename: local_filename(archive_name, index, extension),
        }
    }

    /// The relative reference that replaces the remote URL.
    pub fn relative_url(&self) -> String {
        format!("./{}", self.local_filename)
    }
}

/// `{archive_name}-{index}.{extension}`.
pub fn local_filename(archive_name: &str, index: usize, extension: &str) -> String {
    format!("{archive_name}-{index}.{extension}")
}

/// Stylesheet text with its remote assets replaced by local references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenStylesheet {
    /// Rewritten stylesheet text.
    pub text: String,
    /// One entry per rewritten occurrence, ordered by index.
    pub references: Vec<AssetReference>,
}

impl RewrittenStylesheet {
    /// Whether the stylesheet referenced no remote assets.
    pub fn is_self_contained(&self) -> bool {
        self.references.is_empty()
    }
}

/// Discover remote assets and rewrite them to local references.
///
/// Every occurrence gets its own index, so a URL repeated in two rules is
/// fetched and stored twice under two names.
pub fn rewrite(stylesheet: &str, archive_name: &str) -> RewrittenStylesheet {
    let mut text = String::with_capacity(stylesheet.len());
    let mut references = Vec::new();
    let mut last_end = 0;

    for captures in asset_url_regex().captures_iter(stylesheet) {
        let (Some(whole), Some(stem), Some(extension)) =
            (captures.get(0), captures.get(1), captures.get(2))
        else {
            continue;
        };

        let reference =
            AssetReference::new(archive_name, references.len(), stem.as_str(), extension.as_str());

        text.push_str(&stylesheet[last_end..whole.start()]);
        text.push_str("url(");
        text.push_str(&reference.relative_url());
        text.push(')');
        last_end = whole.end();

        references.push(reference);
    }
    text.push_str(&stylesheet[last_end..]);

    RewrittenStylesheet { text, references }
}
