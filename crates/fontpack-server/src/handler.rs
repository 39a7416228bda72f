//! Per-request dispatch.
//!
//! Fixed routes are answered inline. A bundle request gets a request id, a
//! [`PipelineRun`] and a spawned pipeline task; whichever of the task or the
//! request deadline finishes first supplies the one response the caller sees.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{
    HeaderValue, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, USER_AGENT,
};
use http::{Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use tracing::{debug, info_span, warn, Instrument, Span};

use fontpack_core::archive::DEFAULT_CHUNK_SIZE;
use fontpack_core::{
    Bundle, FontQuery, FontType, FontpackError, Identity, Outcome, Pipeline, PipelineRun,
    PipelineStage, RequestId, RequestIdGenerator, Transport,
};
use fontpack_telemetry::metrics::{record_request, render_metrics, InFlightGuard};

use crate::router::Route;

/// Body returned for a font type that maps to no user agent.
pub const UNRESOLVED_FONT_TYPE: &str = "Could not resolve font type";

/// Response body type.
pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// Response type produced by [`FontpackHandler`].
pub type HttpResponse = Response<ResponseBody>;

/// Routes requests and runs bundle pipelines.
#[derive(Debug)]
pub struct FontpackHandler<T> {
    pipeline: Arc<Pipeline<T>>,
    request_ids: RequestIdGenerator,
    home_url: String,
    request_timeout: Duration,
}

impl<T: Transport> FontpackHandler<T> {
    /// Create a handler around `pipeline`.
    pub fn new(pipeline: Pipeline<T>, home_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            request_ids: RequestIdGenerator::new(),
            home_url: home_url.into(),
            request_timeout,
        }
    }

    /// Deadline applied to each bundle request.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Answer one request.
    ///
    /// Only the URI and `User-Agent` header are read; the body is ignored.
    pub async fn handle<B: Send>(&self, req: Request<B>) -> HttpResponse {
        let path = req
            .uri()
            .path_and_query()
            .map_or_else(|| req.uri().path().to_string(), |pq| pq.as_str().to_string());
        let inbound_user_agent = req
            .headers()
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let route = Route::resolve(&path);
        debug!(method = %req.method(), path = %path, route = route.name(), "routing request");

        match route {
            Route::Home => redirect(&self.home_url),
            Route::Ping => text_response(StatusCode::OK, "Pong"),
            Route::Metrics => match render_metrics() {
                Some(body) => metrics_response(body),
                None => text_response(StatusCode::NOT_FOUND, "Metrics disabled"),
            },
            Route::Invalid => {
                text_response(StatusCode::BAD_REQUEST, format!("Invalid request: {path}"))
            }
            Route::Bundle {
                font_type,
                query,
                family,
            } => {
                let request_id = self.request_ids.next_id();
                let span = info_span!(
                    "request",
                    request_id = %request_id,
                    font_type = %font_type,
                    family = %family,
                );
                self.bundle(request_id, &font_type, query, &family, inbound_user_agent.as_deref())
                    .instrument(span)
                    .await
            }
        }
    }

    async fn bundle(
        &self,
        request_id: RequestId,
        font_type: &str,
        query: String,
        family: &str,
        inbound_user_agent: Option<&str>,
    ) -> HttpResponse {
        let identity = font_type
            .parse::<FontType>()
            .ok()
            .and_then(|t| Identity::for_font_type(t, inbound_user_agent));
        let Some(identity) = identity else {
            warn!("{UNRESOLVED_FONT_TYPE}");
            return text_response(StatusCode::BAD_REQUEST, UNRESOLVED_FONT_TYPE);
        };

        let query = FontQuery::new(query, family, identity);
        self.run_pipeline(request_id, query).await
    }

    async fn run_pipeline(&self, request_id: RequestId, query: FontQuery) -> HttpResponse {
        let _in_flight = InFlightGuard::new();
        let (run, rx) = PipelineRun::<HttpResponse>::new(request_id);

        let worker = {
            let pipeline = Arc::clone(&self.pipeline);
            let run = Arc::clone(&run);
            tokio::spawn(
                async move {
                    let (response, outcome) = match pipeline.run(&run, &query).await {
                        Ok(bundle) => (bundle_response(bundle), Outcome::Success),
                        Err(e) => {
                            warn!(category = e.category(), error = %e, "request failed");
                            (error_response(&e), Outcome::Error)
                        }
                    };
                    run.respond(response, outcome);
                }
                .instrument(Span::current()),
            )
        };

        tokio::select! {
            joined = worker => {
                if let Err(e) = joined {
                    let err = FontpackError::internal(format!("pipeline task ended abnormally: {e}"));
                    warn!(category = err.category(), error = %err, "request failed");
                    run.respond(error_response(&err), Outcome::Error);
                }
            }
            () = tokio::time::sleep(self.request_timeout) => {
                warn!(stage = %run.stage(), timeout = ?self.request_timeout, "request deadline reached");
                let message = format!("Request timed out after {}s", self.request_timeout.as_secs());
                run.respond(text_response(StatusCode::BAD_REQUEST, message), Outcome::Error);
            }
        }

        let outcome = match run.stage() {
            PipelineStage::Responded(outcome) => outcome,
            _ => Outcome::Error,
        };
        record_request(outcome.as_str(), run.elapsed());

        rx.await.unwrap_or_else(|_| {
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "response was lost")
        })
    }
}

/// 200 with the archive streamed as an attachment.
fn bundle_response(bundle: Bundle) -> HttpResponse {
    let size = bundle.archive.size();
    let disposition = HeaderValue::from_str(&format!("attachment; filename={}", bundle.filename));

    let frames = bundle
        .archive
        .into_stream(DEFAULT_CHUNK_SIZE)
        .map(|chunk| Ok::<_, Infallible>(Frame::data(chunk)));
    let mut response = Response::new(StreamBody::new(frames).boxed_unsync());

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
    if let Ok(disposition) = disposition {
        headers.insert(CONTENT_DISPOSITION, disposition);
    }
    response
}

/// Pipeline failures surface as client errors carrying the error message.
fn error_response(err: &FontpackError) -> HttpResponse {
    text_response(err.status_code(), err.to_string())
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    let mut response = Response::new(Full::new(body.into()).boxed_unsync());
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn metrics_response(body: String) -> HttpResponse {
    let mut response = text_response(StatusCode::OK, body);
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

fn redirect(location: &str) -> HttpResponse {
    let mut response = text_response(StatusCode::FOUND, "Redirecting...");
    if let Ok(location) = HeaderValue::from_str(location) {
        response.headers_mut().insert(LOCATION, location);
    }
    response
}
