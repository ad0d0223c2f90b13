use std::fmt;
use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use teloxide::prelude::*;
use teloxide::update_listeners::UpdateListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::platform::telegram::{self, BotListener};
use crate::{bot, health, report, shutdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    ShuttingDown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Starting => write!(f, "starting"),
            Phase::Running => write!(f, "running"),
            Phase::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

type TaskOutcome = (&'static str, Result<()>);

/// Run the bot until SIGINT/SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let bot = Bot::new(&config.telegram.token);
    run_until(config, bot, shutdown::signal()).await
}

/// Run the bot until `shutdown` resolves or one of the servers fails.
///
/// Returns `Ok` after a requested shutdown and `Err` when a listener could not
/// be bound or stopped on its own.
pub async fn run_until<F>(config: Config, bot: Bot, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    info!(phase = %Phase::Starting, "BrightMindBot is starting");

    // Registration failure is reported but does not stop the servers.
    let request_timeout = config.server.request_timeout;
    match tokio::time::timeout(request_timeout, telegram::register_webhook(&bot, &config)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => report::log_error("webhook registration", &e),
        Err(_) => report::log_error(
            "webhook registration",
            &format!("Telegram did not answer within {:?}", request_timeout),
        ),
    }

    // Bind everything before spawning so a bind failure leaves nothing half-started.
    let bot_listener = BotListener::bind(&config).await?;
    let health_listener =
        health::bind(&config.server.bind_host, config.server.health_port).await?;

    let token = CancellationToken::new();
    let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();

    let options = telegram::webhook_options(&config, bot_listener.local_addr()?);
    let (mut update_listener, stop_flag, router) =
        telegram::webhook_router(options, config.server.request_timeout);
    let stop_token = update_listener.stop_token();

    let server_token = token.clone();
    tasks.spawn(async move {
        let shutdown = async move {
            tokio::select! {
                _ = server_token.cancelled() => {}
                _ = stop_flag => {}
            }
        };
        (
            "webhook server",
            telegram::serve(bot_listener, router, request_timeout, shutdown).await,
        )
    });

    let mut dispatcher = bot::build_dispatcher(bot);
    tasks.spawn(async move {
        dispatcher
            .dispatch_with_listener(
                update_listener,
                LoggingErrorHandler::with_custom_text("An error from the update listener"),
            )
            .await;
        ("dispatcher", Ok(()))
    });

    let health_token = token.clone();
    tasks.spawn(async move {
        (
            "health server",
            health::serve(health_listener, request_timeout, health_token).await,
        )
    });

    info!(phase = %Phase::Running, "BrightMindBot is running");

    let outcome = tokio::select! {
        _ = shutdown => {
            info!("Termination signal received");
            Ok(())
        }
        Some(joined) = tasks.join_next() => match joined {
            Ok((name, Ok(()))) => Err(anyhow!("{} stopped unexpectedly", name)),
            Ok((name, Err(e))) => Err(e.context(format!("{} failed", name))),
            Err(e) => Err(anyhow!(e).context("server task panicked")),
        },
    };

    info!(phase = %Phase::ShuttingDown, "BrightMindBot is shutting down");
    token.cancel();
    stop_token.stop();
    drain(&mut tasks, config.server.shutdown_timeout).await;

    outcome
}

/// Wait for the remaining tasks, aborting whatever is still running after `timeout`.
async fn drain(tasks: &mut JoinSet<TaskOutcome>, timeout: Duration) {
    let finished = tokio::time::timeout(timeout, async {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => debug!(task = name, "stopped"),
                Ok((name, Err(e))) => report::log_error(name, &e),
                Err(e) => error!("Server task panicked: {}", e),
            }
        }
    })
    .await;

    if finished.is_err() {
        warn!(
            remaining = tasks.len(),
            "Shutdown drain timed out after {:?}; aborting remaining tasks", timeout
        );
        tasks.shutdown().await;
    }
}
