mod common;

use std::time::Duration;

use common::{FirstGet, Route, StubServer, fast_config, init_tracing};
use media_cache_engine::retry::AttemptOutcome;
use media_cache_engine::{DownloadError, DownloaderConfig, MediaDownloader};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn forbidden_is_not_retried() {
    init_tracing();
    let server = StubServer::start([("/hotlinked.jpg", Route::status(403))]).await;
    let downloader = MediaDownloader::new(fast_config());

    let err = downloader
        .download(&server.url("/hotlinked.jpg"), "", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::StatusCode { .. }), "{err:?}");
    assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
    assert_eq!(server.gets(), 1);
}

#[tokio::test]
async fn unavailable_is_retried_until_exhausted() {
    init_tracing();
    let server = StubServer::start([("/busy.png", Route::status(503))]).await;
    let config = fast_config();
    let max_retries = config.max_retries;
    let downloader = MediaDownloader::new(config);

    let err = downloader
        .download(&server.url("/busy.png"), "", &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        DownloadError::RetriesExhausted { attempts, last } => {
            assert_eq!(*attempts, max_retries);
            assert!(matches!(**last, DownloadError::StatusCode { .. }));
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
    assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(server.gets(), max_retries as usize);
}

#[tokio::test]
async fn success_reports_content_type_and_attempts() {
    init_tracing();
    let server = StubServer::start([(
        "/photo",
        Route::ok(Some("image/webp"), b"RIFF....WEBP"),
    )])
    .await;
    let downloader = MediaDownloader::new(fast_config());

    let download = downloader
        .download(&server.url("/photo"), "", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(download.bytes.as_ref(), b"RIFF....WEBP");
    assert_eq!(download.content_type(), "image/webp");
    assert_eq!(download.attempts.len(), 1);
    assert_eq!(
        download.attempts[0].outcome,
        AttemptOutcome::Success { status: 200 }
    );
    assert_eq!(server.heads(), 1);
    assert_eq!(server.gets(), 1);
}

#[tokio::test]
async fn probe_can_be_disabled() {
    let server = StubServer::start([("/a.gif", Route::ok(Some("image/gif"), b"GIF89a"))]).await;
    let config = DownloaderConfig::builder()
        .with_probe_enabled(false)
        .with_system_proxy(false)
        .build();
    let downloader = MediaDownloader::new(config);

    downloader
        .download(&server.url("/a.gif"), "", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(server.heads(), 0);
    assert_eq!(server.gets(), 1);
}

async fn recovers_after_first_get(failure: FirstGet) {
    init_tracing();
    let server = StubServer::start([(
        "/flaky.jpg",
        Route::ok(Some("image/jpeg"), b"\xff\xd8\xff\xe0 jpeg body").failing_first(failure),
    )])
    .await;
    let downloader = MediaDownloader::new(fast_config());

    let download = downloader
        .download(&server.url("/flaky.jpg"), "", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(download.bytes.as_ref(), b"\xff\xd8\xff\xe0 jpeg body");
    assert_eq!(server.gets(), 2);
    assert_eq!(download.attempts.len(), 2);
    assert!(
        matches!(download.attempts[0].outcome, AttemptOutcome::Retryable(_)),
        "{:?}",
        download.attempts[0]
    );
    assert_eq!(
        download.attempts[1].outcome,
        AttemptOutcome::Success { status: 200 }
    );
}

#[tokio::test]
async fn dropped_connection_is_retried() {
    recovers_after_first_get(FirstGet::Hangup).await;
}

#[tokio::test]
async fn truncated_body_is_retried() {
    recovers_after_first_get(FirstGet::Truncate).await;
}

#[tokio::test]
async fn server_error_then_success_recovers() {
    recovers_after_first_get(FirstGet::Status(503)).await;
}

#[tokio::test]
async fn advertised_length_sizes_the_attempt_timeout() {
    init_tracing();
    let server = StubServer::start([(
        "/large.png",
        Route::ok(Some("image/png"), b"\x89PNG").with_head_length(20 * 1024 * 1024),
    )])
    .await;
    let mut config = fast_config();
    config.overall_timeout = Duration::from_secs(120);
    let downloader = MediaDownloader::new(config);

    let download = downloader
        .download(&server.url("/large.png"), "", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(server.heads(), 1);
    // 30s base plus 3s for each MB past the first 10
    assert_eq!(download.attempts[0].timeout, Duration::from_secs(60));
}

#[tokio::test]
async fn cross_site_referer_is_replaced_by_image_origin() {
    let server = StubServer::start([
        ("/x.png", Route::ok(Some("image/png"), b"png")),
        ("/y.png", Route::ok(Some("image/png"), b"png")),
    ])
    .await;
    let downloader = MediaDownloader::new(fast_config());
    let token = CancellationToken::new();

    let download = downloader
        .download(&server.url("/x.png"), "https://news.example.com/story/1", &token)
        .await
        .unwrap();
    assert_eq!(download.referer.as_deref(), Some(server.origin().as_str()));

    let same_site = server.url("/articles/7");
    downloader
        .download(&server.url("/y.png"), &same_site, &token)
        .await
        .unwrap();

    assert_eq!(
        server.referers(),
        vec![Some(server.origin()), Some(same_site)]
    );
}

#[tokio::test]
async fn cancellation_aborts_inflight_request() {
    let server = StubServer::start([(
        "/slow.mp4",
        Route::ok(Some("video/mp4"), b"mp4").with_delay(Duration::from_secs(10)),
    )])
    .await;
    let downloader = MediaDownloader::new(fast_config());
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            token.cancel();
        })
    };

    let started = std::time::Instant::now();
    let err = downloader
        .download(&server.url("/slow.mp4"), "", &token)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, DownloadError::Cancelled), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn overall_deadline_bounds_the_download() {
    let server = StubServer::start([(
        "/slow.jpg",
        Route::ok(Some("image/jpeg"), b"jpg").with_delay(Duration::from_secs(10)),
    )])
    .await;
    let config = DownloaderConfig::builder()
        .with_overall_timeout(Duration::from_millis(300))
        .with_system_proxy(false)
        .build();
    let downloader = MediaDownloader::new(config);

    let started = std::time::Instant::now();
    let err = downloader
        .download(&server.url("/slow.jpg"), "", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::DeadlineExceeded(_)), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn proxy_changes_apply_to_later_downloads() {
    let server = StubServer::start([("/p.png", Route::ok(Some("image/png"), b"png"))]).await;
    let downloader = MediaDownloader::new(fast_config());
    let token = CancellationToken::new();

    // Nothing listens on a port we just released
    let dead_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    downloader
        .set_proxy(&format!("http://127.0.0.1:{dead_port}"))
        .unwrap();

    assert!(downloader.download(&server.url("/p.png"), "", &token).await.is_err());
    assert_eq!(server.gets(), 0);

    downloader.set_proxy("").unwrap();
    downloader
        .download(&server.url("/p.png"), "", &token)
        .await
        .unwrap();
    assert_eq!(server.gets(), 1);
}
