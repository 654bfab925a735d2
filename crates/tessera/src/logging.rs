//! Global tracing subscriber.
use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::error::Error;

/// Install the global subscriber: compact lines on stdout and, when
/// `log_dir` is given, the same lines in a daily rotated file inside it.
///
/// The returned guard flushes the file writer when dropped, keep it alive
/// for the whole program.
pub fn init(level: Level, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>, Error> {
    let filter = tracing_subscriber::filter::LevelFilter::from_level(level);

    let stdout = fmt::layer()
        .compact()
        .with_target(false)
        .with_file(false)
        .without_time()
        .with_filter(filter);

    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tessera.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_filter(filter);

            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout)
        .with(file)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    Ok(guard)
}
