mod app;
mod bot;
mod config;
mod health;
mod http;
mod logging;
mod platform;
mod report;
mod shutdown;
mod tls;

use std::process::ExitCode;

use tracing::{error, info};

use crate::config::{Config, ConfigError, Environment};

#[tokio::main]
async fn main() -> ExitCode {
    // The environment name picks the log format, so resolve config first and
    // fall back to the production format when it cannot be loaded.
    let config = Config::from_env();
    let environment = config
        .as_ref()
        .map(|c| c.environment)
        .unwrap_or(Environment::Prod);

    if let Err(e) = logging::init(environment) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    let Some(config) = resolve_config(config) else {
        return ExitCode::FAILURE;
    };

    match app::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("ERROR: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Log the loaded configuration, or exactly one error line when it is unusable.
fn resolve_config(config: Result<Config, ConfigError>) -> Option<Config> {
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("ERROR: {}", e);
            return None;
        }
    };

    info!(environment = %config.environment, "Logging initialized");
    info!("Configuration loaded successfully");
    info!("  Environment: {}", config.environment);
    info!("  Webhook: {}", config.telegram.webhook_url);
    info!("  BOT_PORT: {}", config.bot_port());
    info!("  TLS: {}", config.tls.enabled);
    info!("  Health port: {}", config.server.health_port);
    Some(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        let out = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        (result, out.lines().map(str::to_string).collect())
    }

    #[test]
    fn test_config_error_logs_one_line_and_stops() {
        let (config, lines) = capture(|| resolve_config(Err(ConfigError::Missing("TELEGRAM_TOKEN"))));

        assert!(config.is_none());
        assert_eq!(lines.len(), 1, "{lines:?}");
        assert!(lines[0].contains("ERROR"), "{}", lines[0]);
        assert!(lines[0].contains("TELEGRAM_TOKEN"), "{}", lines[0]);
    }

    #[test]
    fn test_loaded_config_is_logged_and_returned() {
        let env = [
            ("TELEGRAM_TOKEN", "t1"),
            ("TELEGRAM_WEBHOOK", "https://example.com/hook"),
            ("ENVIRONMENT", "prod"),
        ];
        let loaded = Config::from_lookup(|name| {
            env.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        });

        let (config, lines) = capture(|| resolve_config(loaded));

        assert_eq!(config.unwrap().environment, Environment::Prod);
        assert!(lines[0].contains("Logging initialized"), "{lines:?}");
        assert!(lines.iter().all(|l| !l.contains("ERROR")), "{lines:?}");
    }
}
