//! Upstream stylesheet retrieval.

use tracing::debug;

use crate::error::{FontpackError, FontpackResult};
use crate::identity::Identity;
use crate::transport::Transport;

/// Default upstream font API.
pub const DEFAULT_BASE_URL: &str = "https://fonts.googleapis.com";

/// Fetches stylesheets from a fixed upstream endpoint.
#[derive(Debug, Clone)]
pub struct StylesheetFetcher {
    base_url: String,
}

impl StylesheetFetcher {
    /// Create a fetcher for `base_url` (no trailing slash expected).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Upstream base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for a query: plain concatenation of base and query.
    pub fn url_for(&self, query: &str) -> String {
        format!("{}{}", self.base_url, query)
    }

    /// Fetch the stylesheet text for `query`.
    ///
    /// A transport failure maps to [`FontpackError::UpstreamUnreachable`],
    /// any status other than `200` to [`FontpackError::UpstreamRejected`].
    pub async fn fetch<T: Transport>(
        &self,
        transport: &T,
        query: &str,
        identity: &Identity,
    ) -> FontpackResult<String> {
        let url = self.url_for(query);
        debug!(url = %url, "fetching stylesheet");

        let response = transport
            .get(&url, identity)
            .await
            .map_err(|e| FontpackError::upstream_unreachable(&url, e))?;

        if !response.is_ok() {
            return Err(FontpackError::upstream_rejected(url, response.status.as_u16()));
        }

        Ok(String::from_utf8_lossy(&response.body).into_owned())
    }
}

impl Default for StylesheetFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    const CSS: &str = "@font-face { src: url(http://x/f1.woff); }";

    #[test]
    fn test_url_for() {
        let fetcher = StylesheetFetcher::default();
        assert_eq!(
            fetcher.url_for("/css?family=Roboto:400"),
            "https://fonts.googleapis.com/css?family=Roboto:400"
        );
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let transport = MockTransport::new().with_ok("http://api/css?family=Roboto", CSS);
        let fetcher = StylesheetFetcher::new("http://api");

        let css = fetcher
            .fetch(&transport, "/css?family=Roboto", &Identity::new("ua"))
            .await
            .unwrap();

        assert_eq!(css, CSS);
        assert_eq!(transport.requests(), vec!["http://api/css?family=Roboto".to_string()]);
        assert_eq!(transport.user_agents(), vec!["ua".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_rejected() {
        let transport = MockTransport::new().with_status("http://api/css?family=Nope", 400);
        let fetcher = StylesheetFetcher::new("http://api");

        let err = fetcher
            .fetch(&transport, "/css?family=Nope", &Identity::new("ua"))
            .await
            .unwrap_err();

        match err {
            FontpackError::UpstreamRejected { url, status } => {
                assert_eq!(url, "http://api/css?family=Nope");
                assert_eq!(status, 400);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_unreachable() {
        let transport = MockTransport::new();
        let fetcher = StylesheetFetcher::new("http://api");

        let err = fetcher
            .fetch(&transport, "/css?family=Roboto", &Identity::new("ua"))
            .await
            .unwrap_err();

        assert_eq!(err.category(), "upstream_unreachable");
    }
}
