use std::fmt::Display;

use tracing::error;

/// Single sink for failures that are reported but never retried or surfaced,
/// such as undelivered replies or a failed webhook registration.
pub fn log_error<E>(context: &str, err: &E)
where
    E: Display + ?Sized,
{
    error!(context, "ERROR: {:#}", err);
}
