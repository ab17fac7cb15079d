use std::env;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

const DEBUG_ENV: &str = "RIDE_TRACKER_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "ride-tracker.log";

/// Installs the global subscriber. Logs go to stderr so stdout stays free for
/// snapshot lines; with a log dir they are also written to a daily file.
///
/// The returned guard must live until exit or buffered file output is lost.
pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = filter_from_env(env::var(DEBUG_ENV).ok().as_deref());

    match log_dir {
        Some(dir) => {
            if let Err(err) = fs_err::create_dir_all(dir) {
                eprintln!("ride-tracker: file logging disabled: {}", err);
                init_stderr(filter);
                return None;
            }
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr.and(writer))
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            init_stderr(filter);
            None
        }
    }
}

fn init_stderr(filter: EnvFilter) {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn debug_enabled(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "true" | "TRUE" | "yes" | "YES"))
}

fn filter_from_env(debug_value: Option<&str>) -> EnvFilter {
    if debug_enabled(debug_value) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
