use bq2pg_config::Environment;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;
use std::sync::Once;
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, InitError};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::{EnvFilter, FmtSubscriber, Registry, fmt, layer::SubscriberExt};

/// Directory the rolling log files are written to in production.
const LOG_DIR: &str = "logs";

/// Number of daily log files kept before the oldest is removed.
const MAX_LOG_FILES: usize = 5;

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("failed to detect the environment: {0}")]
    Environment(#[from] std::io::Error),
}

/// Keeps buffered log lines alive until it is dropped.
///
/// Hold it in `main` for the lifetime of the process, otherwise the last lines written to
/// the log file may be lost.
#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

static INIT_TEST_TRACING: Once = Once::new();

/// Enables tracing output for tests when the `ENABLE_TRACING` environment variable is set:
///
/// ENABLE_TRACING=1 cargo test <test_name>
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            // Without an environment we would default to prod and log into files.
            Environment::Dev.set();
            let _log_flusher =
                init_tracing("test").expect("failed to initialize tracing for tests");
        }
    });
}

/// Installs the global tracing subscriber for `app_name`.
///
/// Production-like environments write JSON lines into a daily rotated file under `logs/`,
/// every other environment pretty prints to the terminal. Records emitted through the `log`
/// crate and panics are routed through tracing as well.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let log_flusher = if Environment::load()?.is_prod() {
        init_file_tracing(filter, app_name)?
    } else {
        init_terminal_tracing(filter)?
    };

    set_tracing_panic_hook();

    Ok(log_flusher)
}

fn init_file_tracing(filter: EnvFilter, app_name: &str) -> Result<LogFlusher, TracingError> {
    let file_appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix("log")
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .build(LOG_DIR)?;

    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .json()
            .with_current_span(true)
            .with_span_list(true),
    );

    set_global_default(subscriber)?;

    Ok(LogFlusher::Flusher(guard))
}

fn init_terminal_tracing(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .pretty()
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .finish();

    set_global_default(subscriber)?;

    Ok(LogFlusher::NullFlusher)
}

/// Logs panics through tracing before handing them to the previously installed hook.
///
/// The default hook only writes to stderr, which never reaches the log files.
fn set_tracing_panic_hook() {
    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log_panic(info);
        prev_hook(info);
    }));
}

fn log_panic(panic_info: &PanicHookInfo) {
    let backtrace = Backtrace::capture();
    let (backtrace, note) = match backtrace.status() {
        BacktraceStatus::Captured => (Some(backtrace), None),
        BacktraceStatus::Disabled => (
            None,
            Some("run with RUST_BACKTRACE=1 to display backtraces"),
        ),
        _ => (None, Some("backtraces are not available")),
    };

    let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    };

    let location = panic_info.location().map(|location| location.to_string());

    tracing::error!(
        panic.payload = payload,
        panic.location = location,
        panic.backtrace = backtrace.map(tracing::field::display),
        panic.note = note,
        "a panic occurred",
    );
}
