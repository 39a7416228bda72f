//! Bounded concurrent asset fetching.
//!
//! One task is spawned per [`AssetReference`]; a semaphore admits at most
//! `concurrency` of them to the network at once. Each successful fetch is
//! appended to the shared [`ArchiveAssembler`] as soon as its body arrives.
//!
//! The first failure wins: it is returned immediately, the semaphore is
//! closed so queued tasks never start, and tasks already on the network are
//! detached and left to drain on their own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument, Span};

use crate::archive::{ArchiveAssembler, ArchiveEntry};
use crate::error::{FontpackError, FontpackResult};
use crate::identity::Identity;
use crate::rewrite::AssetReference;
use crate::transport::Transport;

/// Default number of assets fetched concurrently.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Upper bound on the concurrency limit.
pub const MAX_CONCURRENCY: usize = 1024;

/// Outcome of a single asset task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetOutcome {
    /// Fetched and appended to the archive.
    Delivered { bytes: usize },
    /// Never started because a sibling had already failed.
    Skipped,
}

/// Totals for a successful [`AssetFetcher::fetch_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Assets appended to the archive.
    pub delivered: usize,
    /// Sum of the asset body sizes.
    pub bytes: usize,
}

/// Fetches asset references into an archive with bounded concurrency.
#[derive(Debug)]
pub struct AssetFetcher<T> {
    transport: Arc<T>,
    concurrency: usize,
}

impl<T> Clone for AssetFetcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            concurrency: self.concurrency,
        }
    }
}

impl<T: Transport> AssetFetcher<T> {
    /// Create a fetcher admitting at most `concurrency` requests at once.
    ///
    /// The limit is clamped to `1..=MAX_CONCURRENCY`.
    pub fn new(transport: Arc<T>, concurrency: usize) -> Self {
        Self {
            transport,
            concurrency: concurrency.clamp(1, MAX_CONCURRENCY),
        }
    }

    /// Concurrency limit.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetch every reference and append it to `sink`.
    ///
    /// Resolves successfully only once every reference has been delivered.
    /// On failure the first observed error is returned; later failures are
    /// logged and dropped.
    pub async fn fetch_all(
        &self,
        references: &[AssetReference],
        identity: &Identity,
        sink: &Arc<ArchiveAssembler>,
    ) -> FontpackResult<FetchReport> {
        let mut report = FetchReport::default();
        if references.is_empty() {
            return Ok(report);
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let failed = Arc::new(AtomicBool::new(false));
        let identity = Arc::new(identity.clone());
        let mut tasks = JoinSet::new();

        for reference in references.iter().cloned() {
            let transport = Arc::clone(&self.transport);
            let semaphore = Arc::clone(&semaphore);
            let failed = Arc::clone(&failed);
            let identity = Arc::clone(&identity);
            let sink = Arc::clone(sink);

            tasks.spawn(
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return Ok(AssetOutcome::Skipped);
                    };
                    if failed.load(Ordering::Acquire) {
                        return Ok(AssetOutcome::Skipped);
                    }

                    let result = deliver(transport.as_ref(), &reference, &identity, &sink).await;
                    if let Err(ref e) = result {
                        if failed.swap(true, Ordering::AcqRel) {
                            warn!(error = %e, "additional asset failure discarded");
                        }
                    }
                    result
                }
                .instrument(Span::current()),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| FontpackError::internal(format!("asset task ended abnormally: {e}")))
                .and_then(|result| result);

            match outcome {
                Ok(AssetOutcome::Delivered { bytes }) => {
                    report.delivered += 1;
                    report.bytes += bytes;
                }
                Ok(AssetOutcome::Skipped) => {}
                Err(e) => {
                    failed.store(true, Ordering::Release);
                    semaphore.close();
                    debug!(in_flight = tasks.len(), "detaching remaining asset tasks");
                    tasks.detach_all();
                    return Err(e);
                }
            }
        }

        Ok(report)
    }
}

/// Fetch one reference and append it to the archive.
async fn deliver<T: Transport>(
    transport: &T,
    reference: &AssetReference,
    identity: &Identity,
    sink: &ArchiveAssembler,
) -> FontpackResult<AssetOutcome> {
    let body = fetch_asset(transport, reference, identity).await?;
    let bytes = body.len();
    sink.append(ArchiveEntry::binary(reference.local_filename.clone(), body))?;

    metrics::counter!("fontpack_assets_fetched_total").increment(1);
    info!(url = %reference.remote_url, bytes, "fetched asset");
    Ok(AssetOutcome::Delivered { bytes })
}

/// Fetch the body of a single asset.
pub async fn fetch_asset<T: Transport>(
    transport: &T,
    reference: &AssetReference,
    identity: &Identity,
) -> FontpackResult<Bytes> {
    let response = transport
        .get(&reference.remote_url, identity)
        .await
        .map_err(|e| FontpackError::asset_unreachable(&reference.remote_url, reference.index, e))?;

    if !response.is_ok() {
        return Err(FontpackError::asset_rejected(
            &reference.remote_url,
            reference.index,
            response.status.as_u16(),
        ));
    }

    Ok(response.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::rewrite::rewrite;
    use crate::testing::MockTransport;

    fn references(n: usize) -> Vec<AssetReference> {
        let css: String = (0..n)
            .map(|i| format!("a{{url(http://x/f{i}.woff)}}"))
            .collect();
        rewrite(&css, "F").references
    }

    fn transport_for(refs: &[AssetReference], delay: Duration) -> MockTransport {
        refs.iter().fold(MockTransport::new(), |t, r| {
            t.with_delayed_ok(&r.remote_url, vec![r.index as u8; 4], delay)
        })
    }

    #[tokio::test]
    async fn test_fetch_all_delivers_everything() {
        let refs = references(5);
        let transport = Arc::new(transport_for(&refs, Duration::ZERO));
        let fetcher = AssetFetcher::new(Arc::clone(&transport), 2);
        let sink = Arc::new(ArchiveAssembler::new());

        let report = fetcher
            .fetch_all(&refs, &Identity::new("ua"), &sink)
            .await
            .unwrap();

        assert_eq!(report, FetchReport { delivered: 5, bytes: 20 });
        assert_eq!(sink.entry_count(), 5);
        assert_eq!(transport.requests().len(), 5);
        assert!(transport.user_agents().iter().all(|ua| ua == "ua"));
    }

    #[tokio::test]
    async fn test_fetch_all_empty() {
        let fetcher = AssetFetcher::new(Arc::new(MockTransport::new()), 4);
        let sink = Arc::new(ArchiveAssembler::new());
        let report = fetcher.fetch_all(&[], &Identity::new("ua"), &sink).await.unwrap();
        assert_eq!(report, FetchReport::default());
        assert_eq!(sink.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_all_respects_concurrency_limit() {
        let refs = references(12);
        let transport = Arc::new(transport_for(&refs, Duration::from_millis(20)));
        let fetcher = AssetFetcher::new(Arc::clone(&transport), 3);
        let sink = Arc::new(ArchiveAssembler::new());

        fetcher
            .fetch_all(&refs, &Identity::new("ua"), &sink)
            .await
            .unwrap();

        assert!(transport.max_in_flight() <= 3);
        assert!(transport.max_in_flight() >= 2);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_clamped() {
        let fetcher = AssetFetcher::new(Arc::new(MockTransport::new()), 0);
        assert_eq!(fetcher.concurrency(), 1);
    }

    #[tokio::test]
    async fn test_huge_concurrency_is_clamped() {
        let refs = references(1);
        let transport = MockTransport::new().with_ok(&refs[0].remote_url, "a");
        let fetcher = AssetFetcher::new(Arc::new(transport), usize::MAX / 2);
        assert_eq!(fetcher.concurrency(), MAX_CONCURRENCY);

        let sink = Arc::new(ArchiveAssembler::new());
        let report = fetcher
            .fetch_all(&refs, &Identity::new("ua"), &sink)
            .await
            .unwrap();
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn test_fetch_all_rejected_asset() {
        let refs = references(3);
        let transport = MockTransport::new()
            .with_ok(&refs[0].remote_url, "a")
            .with_status(&refs[1].remote_url, 404)
            .with_ok(&refs[2].remote_url, "c");
        let fetcher = AssetFetcher::new(Arc::new(transport), 1);
        let sink = Arc::new(ArchiveAssembler::new());

        let err = fetcher
            .fetch_all(&refs, &Identity::new("ua"), &sink)
            .await
            .unwrap_err();

        match err {
            FontpackError::AssetRejected { url, index, status } => {
                assert_eq!(url, "http://x/f1.woff");
                assert_eq!(index, 1);
                assert_eq!(status, 404);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_all_unreachable_asset() {
        let refs = references(2);
        let transport = MockTransport::new()
            .with_ok(&refs[0].remote_url, "a")
            .with_failure(&refs[1].remote_url, "connection reset");
        let fetcher = AssetFetcher::new(Arc::new(transport), 2);
        let sink = Arc::new(ArchiveAssembler::new());

        let err = fetcher
            .fetch_all(&refs, &Identity::new("ua"), &sink)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "asset_unreachable");
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_no_new_tasks_admitted_after_failure() {
        let refs = references(10);
        let transport = refs
            .iter()
            .fold(MockTransport::new(), |t, r| t.with_status(&r.remote_url, 500));
        let transport = Arc::new(transport);
        let fetcher = AssetFetcher::new(Arc::clone(&transport), 1);
        let sink = Arc::new(ArchiveAssembler::new());

        let err = fetcher
            .fetch_all(&refs, &Identity::new("ua"), &sink)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "asset_rejected");

        tokio::time::sleep(Duration::from_millis(50)).await;
        // One slot: whichever task ran first failed, nobody queued behind it
        // may start afterwards.
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(sink.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_only_first_failure_reported() {
        let refs = references(4);
        let transport = MockTransport::new()
            .with_delayed_status(&refs[0].remote_url, 503, Duration::from_millis(80))
            .with_status(&refs[1].remote_url, 404)
            .with_delayed_status(&refs[2].remote_url, 500, Duration::from_millis(80))
            .with_delayed_status(&refs[3].remote_url, 502, Duration::from_millis(80));
        let fetcher = AssetFetcher::new(Arc::new(transport), 4);
        let sink = Arc::new(ArchiveAssembler::new());

        let err = fetcher
            .fetch_all(&refs, &Identity::new("ua"), &sink)
            .await
            .unwrap_err();

        match err {
            FontpackError::AssetRejected { index, status, .. } => {
                assert_eq!(index, 1);
                assert_eq!(status, 404);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
