use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::Router;
use teloxide::prelude::*;
use teloxide::update_listeners::{webhooks, UpdateListener};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::http;
use crate::tls::{self, TlsListener};

/// The socket Telegram's callbacks arrive on: plain HTTP or TLS-terminated.
pub enum BotListener {
    Plain(TcpListener),
    Tls(TlsListener),
}

impl BotListener {
    pub async fn bind(config: &Config) -> Result<Self> {
        let host = config.bot_host();
        let port = config.bot_port();

        if config.tls.enabled {
            let tls_config =
                tls::server_config(config.tls.cert_path.clone(), config.tls.key_path.clone())?;
            let listener =
                TlsListener::bind((host, port), tls_config, config.server.request_timeout)
                    .await
                    .with_context(|| format!("Failed to bind TLS listener on {}:{}", host, port))?;
            Ok(BotListener::Tls(listener))
        } else {
            let listener = TcpListener::bind((host, port))
                .await
                .with_context(|| format!("Failed to bind bot listener on {}:{}", host, port))?;
            Ok(BotListener::Plain(listener))
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            BotListener::Plain(listener) => listener.local_addr(),
            BotListener::Tls(listener) => axum::serve::Listener::local_addr(listener),
        }
    }
}

pub fn webhook_options(config: &Config, address: SocketAddr) -> webhooks::Options {
    let options = webhooks::Options::new(address, config.telegram.webhook_url.clone());
    match &config.telegram.webhook_secret {
        Some(secret) => options.secret_token(secret.clone()),
        None => options,
    }
}

/// Tell Telegram where to deliver updates.
pub async fn register_webhook(bot: &Bot, config: &Config) -> Result<()> {
    let url = config.telegram.webhook_url.clone();
    let request = bot.set_webhook(url.clone());
    match &config.telegram.webhook_secret {
        Some(secret) => request.secret_token(secret.clone()).await,
        None => request.await,
    }
    .with_context(|| format!("Failed to register webhook {}", url))?;

    info!("Webhook registered: {}", url);
    Ok(())
}

/// Build the update listener, its stop future, and the router that feeds it.
///
/// The router only accepts `POST` on the path of the registered webhook URL and
/// rejects callbacks whose secret token does not match.
pub fn webhook_router(
    options: webhooks::Options,
    request_timeout: Duration,
) -> (
    impl UpdateListener<Err = Infallible>,
    impl Future<Output = ()> + Send,
    Router,
) {
    let (listener, stop_flag, router) = webhooks::axum_no_setup(options);
    let router = router.layer(TraceLayer::new_for_http()).layer(
        TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout),
    );
    (listener, stop_flag, router)
}

/// Serve webhook callbacks until `shutdown` resolves, then drain open requests.
pub async fn serve<F>(
    listener: BotListener,
    router: Router,
    request_timeout: Duration,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Bot listening on {}", listener.local_addr()?);
    match listener {
        BotListener::Plain(listener) => {
            http::serve(listener, router, request_timeout, shutdown).await
        }
        BotListener::Tls(listener) => {
            http::serve(listener, router, request_timeout, shutdown).await
        }
    }
    Ok(())
}
