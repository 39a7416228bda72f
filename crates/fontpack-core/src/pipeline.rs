//! Request pipeline coordination.
//!
//! A [`Pipeline`] is shared by every request; a [`PipelineRun`] holds the
//! state of exactly one. Stages run strictly in order:
//!
//! ```text
//! Start ─► FetchingCss ─► Rewriting ─► FetchingAssets ─► Finalizing ─► Responded(success)
//!              │              │               │               │
//!              └──────────────┴───────────────┴───────────────┴──► Responded(error)
//! ```
//!
//! The run owns the single-fire response slot. Whoever calls
//! [`PipelineRun::respond`] first delivers; any later outcome (a pipeline
//! finishing after a deadline already answered, for instance) is logged and
//! dropped.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveAssembler, ArchiveEntry, FinishedArchive};
use crate::assets::{AssetFetcher, FetchReport};
use crate::error::FontpackResult;
use crate::query::FontQuery;
use crate::rewrite::rewrite;
use crate::stylesheet::StylesheetFetcher;
use crate::transport::Transport;

/// Monotonic per-process request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Wrap a raw id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:04}", self.0)
    }
}

/// Hands out [`RequestId`]s starting at 1.
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    /// Create a generator.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Next id.
    pub fn next_id(&self) -> RequestId {
        RequestId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Archive delivered.
    Success,
    /// Error response delivered.
    Error,
}

impl Outcome {
    /// Label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Created, nothing started.
    Start,
    /// Waiting on the upstream stylesheet.
    FetchingCss,
    /// Scanning and rewriting the stylesheet.
    Rewriting,
    /// Asset tasks in flight.
    FetchingAssets,
    /// Sealing the archive.
    Finalizing,
    /// A response has been emitted.
    Responded(Outcome),
}

impl PipelineStage {
    /// Whether this is the terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Responded(_))
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::FetchingCss => f.write_str("fetching_css"),
            Self::Rewriting => f.write_str("rewriting"),
            Self::FetchingAssets => f.write_str("fetching_assets"),
            Self::Finalizing => f.write_str("finalizing"),
            Self::Responded(outcome) => write!(f, "responded({})", outcome.as_str()),
        }
    }
}

/// State of one inbound request.
///
/// `R` is whatever the front end sends back to the caller (an HTTP response
/// in the server); the run only guarantees it is sent at most once.
pub struct PipelineRun<R> {
    request_id: RequestId,
    started: Instant,
    stage: Mutex<PipelineStage>,
    responded: AtomicBool,
    responder: Mutex<Option<oneshot::Sender<R>>>,
}

impl<R> fmt::Debug for PipelineRun<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRun")
            .field("request_id", &self.request_id)
            .field("stage", &*self.stage.lock())
            .field("responded", &self.responded.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<R: Send> PipelineRun<R> {
    /// Create a run and the receiver its single response will arrive on.
    pub fn new(request_id: RequestId) -> (Arc<Self>, oneshot::Receiver<R>) {
        let (tx, rx) = oneshot::channel();
        let run = Arc::new(Self {
            request_id,
            started: Instant::now(),
            stage: Mutex::new(PipelineStage::Start),
            responded: AtomicBool::new(false),
            responder: Mutex::new(Some(tx)),
        });
        (run, rx)
    }

    /// Request id.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Current stage.
    pub fn stage(&self) -> PipelineStage {
        *self.stage.lock()
    }

    /// Time since the run was created.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Whether a response has already been emitted.
    pub fn has_responded(&self) -> bool {
        self.responded.load(Ordering::Acquire)
    }

    /// Move to `next` unless the run has already responded.
    fn advance(&self, next: PipelineStage) {
        let mut stage = self.stage.lock();
        if stage.is_terminal() {
            return;
        }
        let from = *stage;
        debug!(request_id = %self.request_id, from = %from, to = %next, "pipeline stage");
        *stage = next;
    }

    /// Emit the single response for this run.
    ///
    /// Returns `false`, dropping `response`, if a response was already
    /// emitted. The check-and-set is atomic, so two racing callers can never
    /// both deliver.
    pub fn respond(&self, response: R, outcome: Outcome) -> bool {
        if self
            .responded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(
                request_id = %self.request_id,
                outcome = outcome.as_str(),
                "double write prevented"
            );
            return false;
        }

        *self.stage.lock() = PipelineStage::Responded(outcome);
        if let Some(tx) = self.responder.lock().take() {
            if tx.send(response).is_err() {
                debug!(request_id = %self.request_id, "caller went away before response");
            }
        }
        true
    }
}

/// A finished bundle ready to be streamed.
#[derive(Debug, Clone)]
pub struct Bundle {
    /// Filename offered to the caller (`{archive_name}.zip`).
    pub filename: String,
    /// The sealed archive.
    pub archive: FinishedArchive,
    /// Totals from the asset stage.
    pub assets: FetchReport,
}

/// The stylesheet-to-zip pipeline, shared by all requests.
#[derive(Debug)]
pub struct Pipeline<T> {
    stylesheets: StylesheetFetcher,
    assets: AssetFetcher<T>,
    transport: Arc<T>,
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            stylesheets: self.stylesheets.clone(),
            assets: self.assets.clone(),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport> Pipeline<T> {
    /// Create a pipeline against `base_url` fetching at most `concurrency`
    /// assets at once.
    pub fn new(transport: Arc<T>, base_url: impl Into<String>, concurrency: usize) -> Self {
        Self {
            stylesheets: StylesheetFetcher::new(base_url),
            assets: AssetFetcher::new(Arc::clone(&transport), concurrency),
            transport,
        }
    }

    /// Stylesheet stage.
    pub fn stylesheets(&self) -> &StylesheetFetcher {
        &self.stylesheets
    }

    /// Asset stage.
    pub fn assets(&self) -> &AssetFetcher<T> {
        &self.assets
    }

    /// Run every stage for `query`, advancing `run` as each one starts.
    ///
    /// The first failing stage ends the run; nothing after it executes. The
    /// caller decides what to send through [`PipelineRun::respond`].
    pub async fn run<R: Send>(
        &self,
        run: &PipelineRun<R>,
        query: &FontQuery,
    ) -> FontpackResult<Bundle> {
        let request_id = run.request_id();
        let name = query.archive_name();
        info!(request_id = %request_id, "Creating '{}' archive ({})...", name, query.query());

        run.advance(PipelineStage::FetchingCss);
        let css = self
            .stylesheets
            .fetch(self.transport.as_ref(), query.query(), query.identity())
            .await?;

        run.advance(PipelineStage::Rewriting);
        let rewritten = rewrite(&css, name);
        debug!(
            request_id = %request_id,
            assets = rewritten.references.len(),
            "stylesheet rewritten"
        );

        let sink = Arc::new(ArchiveAssembler::new());
        sink.append(ArchiveEntry::text(query.stylesheet_filename(), rewritten.text))?;

        run.advance(PipelineStage::FetchingAssets);
        let report = self
            .assets
            .fetch_all(&rewritten.references, query.identity(), &sink)
            .await?;

        run.advance(PipelineStage::Finalizing);
        info!(request_id = %request_id, "Finalize '{}'", query.archive_filename());
        let archive = sink.finalize()?;

        metrics::histogram!("fontpack_archive_bytes").record(archive.size() as f64);
        info!(
            request_id = %request_id,
            bytes = archive.size(),
            entries = archive.entry_names().len(),
            "created archive"
        );

        Ok(Bundle {
            filename: query.archive_filename(),
            archive,
            assets: report,
        })
    }
}
