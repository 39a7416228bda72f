//! # Fontpack Server
//!
//! HTTP front end for [`fontpack_core`]. A request for
//! `/{type}/css?family=...` is answered with a zip holding the rewritten
//! stylesheet and every font file it references:
//!
//! ```text
//!   GET /woff2/css?family=Roboto:400,700
//!        │
//!        ▼
//! ┌─────────────┐   route    ┌──────────────────┐   bundle   ┌───────────────┐
//! │ accept loop │ ─────────► │ FontpackHandler  │ ─────────► │ fontpack-core │
//! │  (hyper)    │            │ id, span, timer  │ ◄───────── │   Pipeline    │
//! └─────────────┘            └──────────────────┘            └───────────────┘
//!                                     │
//!                                     ▼
//!                  200 application/zip  |  400 text/plain
//! ```
//!
//! # Example
//!
//! ```bash
//! $ fontpack --port 3000
//! $ curl -OJ 'http://localhost:3000/woff2/css?family=Roboto:400,700'
//! ```

#![doc(html_root_url = "https://docs.rs/fontpack-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod shutdown;

pub use config::{FontpackConfig, FontpackConfigBuilder};
pub use error::{ServerError, ServerResult};
pub use handler::{FontpackHandler, HttpResponse};
pub use router::Route;
pub use server::FontpackServer;
pub use shutdown::ShutdownSignal;

/// Server version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
