use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use axum::serve::Listener;
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use tracing::debug;

/// Accept HTTP/1.1 connections from `listener` until `shutdown` resolves, then
/// wait for open connections to finish.
///
/// `header_read_timeout` bounds how long a connection may sit without sending a
/// complete request head, both for the first request and between keep-alive
/// requests, so silent or slow-dripping clients are disconnected.
pub async fn serve<L, F>(
    mut listener: L,
    router: Router,
    header_read_timeout: Duration,
    shutdown: F,
) where
    L: Listener,
    L::Addr: Debug + 'static,
    F: Future<Output = ()>,
{
    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(header_read_timeout);

    let graceful = GracefulShutdown::new();
    tokio::pin!(shutdown);

    loop {
        let (io, peer) = tokio::select! {
            conn = listener.accept() => conn,
            _ = &mut shutdown => break,
        };

        let service = TowerToHyperService::new(router.clone());
        let conn = graceful.watch(builder.serve_connection(TokioIo::new(io), service));
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(?peer, "Connection closed: {}", e);
            }
        });
    }

    // Stop accepting before draining.
    drop(listener);
    graceful.shutdown().await;
}
