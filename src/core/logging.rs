use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::core::config::AppPaths;

const DEFAULT_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "docchat";
const KEPT_LOG_FILES: usize = 14;

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Logs to stdout, and to `<data_dir>/logs/docchat.<date>.log` (two weeks
/// kept) when that directory is usable. `RUST_LOG` replaces the default
/// `info` filter. Only the first call installs anything.
pub fn init(paths: &AppPaths) {
    if FILE_GUARD.get().is_some() {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, file_error) = match file_writer(&paths.log_dir()) {
        Ok((writer, guard)) => {
            let _ = FILE_GUARD.set(guard);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), None)
        }
        Err(err) => (None, Some(err)),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .is_ok();

    if let (true, Some(err)) = (installed, file_error) {
        tracing::warn!("File logging disabled: {}", err);
    }
}

fn file_writer(log_dir: &Path) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(KEPT_LOG_FILES)
        .build(log_dir)?;
    Ok(tracing_appender::non_blocking(appender))
}
