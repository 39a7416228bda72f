//! Request path routing.
//!
//! Bundle requests mirror the upstream API's own path so a stylesheet link can
//! be turned into a download link by swapping the host:
//!
//! ```text
//! /css?family=Roboto:400,700          -> default font type (woff)
//! /woff2/css?family=Roboto:400,700    -> explicit font type
//! ```

use std::sync::OnceLock;

use regex::Regex;

/// Font type used when the path names none.
pub const DEFAULT_FONT_TYPE: &str = "woff";

fn bundle_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(/([a-z2]+))?(/css\?family=([^:]+).*)$").expect("bundle path pattern is valid")
    })
}

/// Where an inbound request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `GET /`: redirect to the project page.
    Home,
    /// `GET /ping`: liveness probe.
    Ping,
    /// `GET /metrics`: Prometheus exposition.
    Metrics,
    /// A stylesheet bundle request.
    Bundle {
        /// Font type selector, not yet validated.
        font_type: String,
        /// Query forwarded upstream, starting at `/css`.
        query: String,
        /// Family segment, up to the first `:`.
        family: String,
    },
    /// Anything else.
    Invalid,
}

impl Route {
    /// Route a request by its path and query string.
    pub fn resolve(path_and_query: &str) -> Self {
        match path_and_query {
            "/" => return Self::Home,
            "/ping" => return Self::Ping,
            "/metrics" => return Self::Metrics,
            _ => {}
        }

        let Some(captures) = bundle_pattern().captures(path_and_query) else {
            return Self::Invalid;
        };

        let font_type = captures
            .get(2)
            .map_or(DEFAULT_FONT_TYPE, |m| m.as_str())
            .to_string();
        let (Some(query), Some(family)) = (captures.get(3), captures.get(4)) else {
            return Self::Invalid;
        };

        Self::Bundle {
            font_type,
            query: query.as_str().to_string(),
            family: family.as_str().to_string(),
        }
    }

    /// Short label for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Ping => "ping",
            Self::Metrics => "metrics",
            Self::Bundle { .. } => "bundle",
            Self::Invalid => "invalid",
        }
    }
}
