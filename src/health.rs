//! Liveness probe served on its own listener.
//!
//! `GET /healthz` answers as long as the process is running; it does not look
//! at the bot or the webhook.

use std::time::Duration;

use anyhow::{Context, Result};
use axum::{http::StatusCode, routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::http;

pub const HEALTH_BODY: &str = "It is alive";

pub fn router(request_timeout: Duration) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
}

async fn healthz() -> &'static str {
    HEALTH_BODY
}

pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind health listener on {}:{}", host, port))
}

/// Serve until `token` is cancelled, then let open requests finish.
pub async fn serve(
    listener: TcpListener,
    request_timeout: Duration,
    token: CancellationToken,
) -> Result<()> {
    info!("listening on {}", listener.local_addr()?);
    http::serve(
        listener,
        router(request_timeout),
        request_timeout,
        token.cancelled_owned(),
    )
    .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tower::ServiceExt;

    async fn get_path(path: &str) -> (StatusCode, String) {
        let app = router(Duration::from_secs(5));
        let req = Request::builder()
            .uri(path)
            .body(Body::empty())
            .expect("request");
        let resp = app.oneshot(req).await.expect("response");
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn test_healthz_is_alive() {
        let (status, body) = get_path("/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "It is alive");
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (status, _) = get_path("/readyz").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_post_healthz_not_allowed() {
        let app = router(Duration::from_secs(5));
        let req = Request::builder()
            .method("POST")
            .uri("/healthz")
            .body(Body::empty())
            .expect("request");
        let resp = app.oneshot(req).await.expect("response");
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let token = CancellationToken::new();
        let server = tokio::spawn(serve(listener, Duration::from_secs(5), token.clone()));

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server stopped")
            .expect("join");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_serves_healthz_over_tcp() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let server = tokio::spawn(serve(listener, Duration::from_secs(5), token.clone()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response);

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("It is alive"), "{response}");
        token.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_silent_connection_is_dropped() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let _server = tokio::spawn(serve(listener, Duration::from_secs(1), token.clone()));

        // Never send a request head; the server must give up on us.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 128];
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("server kept a silent connection open");
        let n = read.unwrap_or(0);
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(n == 0 || text.starts_with("HTTP/1.1 408"), "{text}");
        token.cancel();
    }
}
