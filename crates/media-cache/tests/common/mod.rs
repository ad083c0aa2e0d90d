//! In-process HTTP/1.1 stub used by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use media_cache_engine::{DownloaderConfig, RetryPolicy};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Initialize tracing for tests
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("media_cache_engine=debug")
        .with_test_writer()
        .try_init();
}

/// How the first GET of a path misbehaves before normal service
#[derive(Debug, Clone, Copy)]
pub enum FirstGet {
    /// Close the connection without answering
    Hangup,
    /// Promise the full length, send a few bytes, then close
    Truncate,
    /// Answer with this status instead
    Status(u16),
}

/// Canned response for one path
#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
    /// Delay before answering a GET
    pub delay: Duration,
    pub first_get: Option<FirstGet>,
    /// `Content-Length` advertised to HEAD instead of the body length
    pub head_length: Option<u64>,
}

impl Route {
    pub fn ok(content_type: Option<&'static str>, body: &[u8]) -> Self {
        Self {
            status: 200,
            content_type,
            body: body.to_vec(),
            delay: Duration::ZERO,
            first_get: None,
            head_length: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: Some("text/plain"),
            body: b"nope".to_vec(),
            delay: Duration::ZERO,
            first_get: None,
            head_length: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_first(mut self, failure: FirstGet) -> Self {
        self.first_get = Some(failure);
        self
    }

    pub fn with_head_length(mut self, length: u64) -> Self {
        self.head_length = Some(length);
        self
    }
}

#[derive(Debug, Default)]
struct Recorded {
    gets: AtomicUsize,
    heads: AtomicUsize,
    referers: Mutex<Vec<Option<String>>>,
    gets_by_path: Mutex<HashMap<String, usize>>,
}

pub struct StubServer {
    addr: SocketAddr,
    recorded: Arc<Recorded>,
    task: JoinHandle<()>,
}

impl StubServer {
    pub async fn start(routes: impl IntoIterator<Item = (&'static str, Route)>) -> Self {
        let routes: Arc<HashMap<String, Route>> = Arc::new(
            routes
                .into_iter()
                .map(|(path, route)| (path.to_string(), route))
                .collect(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Recorded::default());

        let task = {
            let recorded = recorded.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let routes = routes.clone();
                    let recorded = recorded.clone();
                    tokio::spawn(async move {
                        let _ = handle(stream, &routes, &recorded).await;
                    });
                }
            })
        };

        Self {
            addr,
            recorded,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn origin(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn gets(&self) -> usize {
        self.recorded.gets.load(Ordering::SeqCst)
    }

    pub fn heads(&self) -> usize {
        self.recorded.heads.load(Ordering::SeqCst)
    }

    /// Referer headers of the GET requests, in arrival order.
    pub fn referers(&self) -> Vec<Option<String>> {
        self.recorded.referers.lock().clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle(
    mut stream: TcpStream,
    routes: &HashMap<String, Route>,
    recorded: &Recorded,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buf).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let referer = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("referer"))
        .map(|(_, value)| value.trim().to_string());

    let route = routes
        .get(&path)
        .cloned()
        .unwrap_or_else(|| Route::status(404));

    let mut failure = None;
    if method == "GET" {
        recorded.gets.fetch_add(1, Ordering::SeqCst);
        recorded.referers.lock().push(referer);
        let nth = {
            let mut by_path = recorded.gets_by_path.lock();
            let count = by_path.entry(path.clone()).or_default();
            *count += 1;
            *count
        };
        if nth == 1 {
            failure = route.first_get;
        }
        tokio::time::sleep(route.delay).await;
    } else {
        recorded.heads.fetch_add(1, Ordering::SeqCst);
    }

    let (status, body_len) = match failure {
        Some(FirstGet::Hangup) => return Ok(()),
        Some(FirstGet::Status(status)) => (status, route.body.len() as u64),
        _ if method == "HEAD" => (
            route.status,
            route.head_length.unwrap_or(route.body.len() as u64),
        ),
        _ => (route.status, route.body.len() as u64),
    };

    let mut response = format!(
        "HTTP/1.1 {status} Stub\r\nContent-Length: {body_len}\r\nConnection: close\r\n"
    );
    if let Some(content_type) = route.content_type {
        response.push_str(&format!("Content-Type: {content_type}\r\n"));
    }
    response.push_str("\r\n");

    stream.write_all(response.as_bytes()).await?;
    match (method.as_str(), failure) {
        ("HEAD", _) => {}
        (_, Some(FirstGet::Truncate)) => {
            let cut = route.body.len().min(2);
            stream.write_all(&route.body[..cut]).await?;
        }
        _ => stream.write_all(&route.body).await?,
    }
    stream.shutdown().await
}

/// Downloader settings with millisecond backoff and no environment proxy.
pub fn fast_config() -> DownloaderConfig {
    DownloaderConfig::builder()
        .with_retry_policy(RetryPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(40),
        ))
        .with_system_proxy(false)
        .build()
}
