//! # Fontpack Core
//!
//! Turns a web-font stylesheet into a self-contained zip bundle.
//!
//! For one request the [`Pipeline`] fetches the upstream stylesheet, rewrites
//! every absolute `url(...)` to a local file, fetches those files with
//! bounded concurrency and packs everything into a single archive:
//!
//! ```text
//! ┌──────────────┐    ┌──────────┐    ┌─────────────────┐    ┌──────────────┐
//! │  Stylesheet  │──► │ Rewriter │──► │  Asset fetcher  │──► │   Archive    │
//! │   fetcher    │    │          │    │ (N in flight)   │    │  assembler   │
//! └──────────────┘    └──────────┘    └─────────────────┘    └──────────────┘
//! ```
//!
//! - [`rewrite`] - asset discovery and stylesheet rewriting
//! - [`AssetFetcher`] - bounded, first-error-wins asset fetching
//! - [`ArchiveAssembler`] - append-only zip sink
//! - [`PipelineRun`] - per-request state and the single-fire response slot
//! - [`FontpackError`] - error taxonomy

#![doc(html_root_url = "https://docs.rs/fontpack-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod archive;
pub mod assets;
mod error;
pub mod identity;
pub mod pipeline;
mod query;
pub mod rewrite;
pub mod stylesheet;
pub mod testing;
pub mod transport;

pub use archive::{ArchiveAssembler, ArchiveEntry, FinishedArchive};
pub use assets::{AssetFetcher, FetchReport, DEFAULT_CONCURRENCY, MAX_CONCURRENCY};
pub use error::{FontpackError, FontpackResult};
pub use identity::{FontType, Identity};
pub use pipeline::{Bundle, Outcome, Pipeline, PipelineRun, PipelineStage, RequestId, RequestIdGenerator};
pub use query::{sanitize_archive_name, FontQuery};
pub use rewrite::{rewrite, AssetReference, RewrittenStylesheet};
pub use stylesheet::{StylesheetFetcher, DEFAULT_BASE_URL};
pub use transport::{FetchedBody, HttpTransport, Transport, TransportError};
