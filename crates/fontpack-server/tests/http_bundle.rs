//! End-to-end tests over real sockets.
//!
//! A loopback hyper server plays the font API and the font host; fontpack
//! runs with its production HTTP transport and is driven with reqwest.

use std::convert::Infallible;
use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, LOCATION, USER_AGENT};
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use zip::ZipArchive;

use fontpack_core::identity::{WOFF2_USER_AGENT, WOFF_USER_AGENT};
use fontpack_server::{FontpackConfig, FontpackServer, ServerResult, ShutdownSignal};

/// User agents seen by the fake upstream, in arrival order.
type Seen = Arc<Mutex<Vec<String>>>;

fn upstream_response(addr: SocketAddr, req: &Request<Incoming>, seen: &Seen) -> Response<Full<Bytes>> {
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    seen.lock().unwrap().push(user_agent);

    let path = req.uri().path_and_query().map_or("/", |pq| pq.as_str());
    let (status, body) = match path {
        "/css?family=Roboto:400" => (
            200,
            format!(
                "@font-face {{ src: url(http://{addr}/fonts/r1.woff2); }}\n\
                 @font-face {{ src: url(http://{addr}/fonts/r2.woff2); }}\n"
            ),
        ),
        "/css?family=Missing" => (
            200,
            format!("@font-face {{ src: url(http://{addr}/fonts/missing.woff2); }}"),
        ),
        "/fonts/r1.woff2" => (200, "R1-BYTES".to_string()),
        "/fonts/r2.woff2" => (200, "R2-BYTES".to_string()),
        _ => (404, "not found".to_string()),
    };

    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

async fn spawn_upstream() -> (SocketAddr, Seen) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen: Seen = Arc::default();

    let recorder = Arc::clone(&seen);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let seen = Arc::clone(&recorder);
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let seen = Arc::clone(&seen);
                    async move { Ok::<_, Infallible>(upstream_response(addr, &req, &seen)) }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (addr, seen)
}

struct TestServer {
    base: String,
    shutdown: ShutdownSignal,
    task: JoinHandle<ServerResult<()>>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(upstream: SocketAddr) -> Self {
        let config = FontpackConfig::builder()
            .listen_addr("127.0.0.1")
            .listen_port(0)
            .home_url("https://home.test/readme")
            .upstream_url(format!("http://{upstream}"))
            .upstream_timeout(Duration::from_secs(5))
            .concurrency(2)
            .shutdown_timeout(Duration::from_secs(1))
            .metrics_enabled(false)
            .build()
            .unwrap();

        let server = FontpackServer::new(config).unwrap();
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = ShutdownSignal::new();
        let task = tokio::spawn(server.serve(listener, shutdown.clone()));

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        Self {
            base: format!("http://{addr}"),
            shutdown,
            task,
            client,
        }
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap()
    }

    async fn stop(self) {
        self.shutdown.trigger();
        let result = tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server should stop")
            .expect("server task should not panic");
        assert!(result.is_ok());
    }
}

fn unzip(bytes: &[u8]) -> Vec<(String, String)> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        entries.push((file.name().to_string(), text));
    }
    entries.sort();
    entries
}

#[tokio::test]
async fn test_bundle_is_served_as_zip() {
    let (upstream, seen) = spawn_upstream().await;
    let server = TestServer::start(upstream).await;

    let response = server.get("/woff2/css?family=Roboto:400").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/zip");
    assert_eq!(
        response.headers()[CONTENT_DISPOSITION],
        "attachment; filename=Roboto.zip"
    );

    let bytes = response.bytes().await.unwrap();
    let entries = unzip(&bytes);
    assert_eq!(
        entries,
        vec![
            ("Roboto-0.woff2".to_string(), "R1-BYTES".to_string()),
            ("Roboto-1.woff2".to_string(), "R2-BYTES".to_string()),
            (
                "Roboto.css".to_string(),
                "@font-face { src: url(./Roboto-0.woff2); }\n\
                 @font-face { src: url(./Roboto-1.woff2); }\n"
                    .to_string()
            ),
        ]
    );

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|ua| ua == WOFF2_USER_AGENT));

    server.stop().await;
}

#[tokio::test]
async fn test_missing_asset_is_a_client_error() {
    let (upstream, seen) = spawn_upstream().await;
    let server = TestServer::start(upstream).await;

    let response = server.get("/css?family=Missing").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(CONTENT_DISPOSITION).is_none());
    let body = response.text().await.unwrap();
    assert_eq!(
        body,
        format!("Asset rejected: could not fetch item #0 http://{upstream}/fonts/missing.woff2 (404)")
    );
    assert!(seen.lock().unwrap().iter().all(|ua| ua == WOFF_USER_AGENT));

    server.stop().await;
}

#[tokio::test]
async fn test_upstream_rejection_is_a_client_error() {
    let (upstream, _) = spawn_upstream().await;
    let server = TestServer::start(upstream).await;

    let response = server.get("/ttf/css?family=Unknown").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.text().await.unwrap().starts_with("Upstream rejected"));

    server.stop().await;
}

#[tokio::test]
async fn test_fixed_routes() {
    let (upstream, seen) = spawn_upstream().await;
    let server = TestServer::start(upstream).await;

    let ping = server.get("/ping").await;
    assert_eq!(ping.status(), StatusCode::OK);
    assert_eq!(ping.text().await.unwrap(), "Pong");

    let home = server.get("/").await;
    assert_eq!(home.status(), StatusCode::FOUND);
    assert_eq!(home.headers()[LOCATION], "https://home.test/readme");

    let invalid = server.get("/robots.txt").await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    assert_eq!(invalid.text().await.unwrap(), "Invalid request: /robots.txt");

    let unresolved = server.get("/svg/css?family=Roboto:400").await;
    assert_eq!(unresolved.status(), StatusCode::BAD_REQUEST);
    assert_eq!(unresolved.text().await.unwrap(), "Could not resolve font type");

    assert!(seen.lock().unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_unreachable_upstream() {
    // Bind then drop to get a port nobody listens on.
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let server = TestServer::start(closed).await;

    let response = server.get("/css?family=Roboto:400").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.text().await.unwrap().starts_with("Upstream unreachable"));

    server.stop().await;
}
