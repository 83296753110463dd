use std::path::Path;
use anyhow::Context;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_FILE_NAME: &str = "noviswitch.log";

/// Log to stdout and, when a folder is given, to a daily rolling file in it. The returned guard
/// flushes the file writer and must be held until the program ends.
pub fn configure_logging(
    level: LevelFilter,
    log_dir: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let stdout_log = tracing_subscriber::fmt::layer()
        .with_filter(level);

    let (file_log, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log folder {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_log = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking)
                .with_filter(level);
            (Some(file_log), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_log)
        .with(file_log)
        .init();
    Ok(guard)
}
