//! Setup of the global tracing subscriber.

use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::FmtSubscriber;

use crate::settings::LoggingSettings;

/// Installs a formatting subscriber filtered by the logging settings as the global default.
///
/// # Errors
/// Fails if a global subscriber was already installed.
pub fn configure(settings: LoggingSettings) -> Result<(), SetGlobalDefaultError> {
    let fmt_subscriber = FmtSubscriber::builder()
        .with_ansi(true)
        .with_env_filter(settings.filter)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)
}
