//! Per-request font query.

use crate::identity::Identity;

/// Everything the pipeline needs to know about one inbound request.
///
/// Built by the router, consumed once by [`Pipeline::run`](crate::Pipeline::run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontQuery {
    query: String,
    archive_name: String,
    identity: Identity,
}

impl FontQuery {
    /// Create a query.
    ///
    /// `query` is appended verbatim to the upstream base URL and must already
    /// be URL-encoded. `family` is sanitized into the archive name.
    pub fn new(query: impl Into<String>, family: &str, identity: Identity) -> Self {
        Self {
            query: query.into(),
            archive_name: sanitize_archive_name(family),
            identity,
        }
    }

    /// Upstream query (path and query string).
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Base name for the archive and every entry inside it.
    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    /// Outbound identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Name of the stylesheet entry inside the archive.
    pub fn stylesheet_filename(&self) -> String {
        format!("{}.css", self.archive_name)
    }

    /// Filename offered to the caller.
    pub fn archive_filename(&self) -> String {
        format!("{}.zip", self.archive_name)
    }
}

/// Strip every non-word character (anything outside `[A-Za-z0-9_]`).
pub fn sanitize_archive_name(family: &str) -> String {
    family
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}
