// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Logging sink setup.
//!
//! Components log through the `tracing` macros; this module owns the sink:
//! console for interactive use, a timestamped daemon log file otherwise. The
//! minimum level can be swapped at runtime; the reload handle is guarded by a
//! process-wide mutex.

use std::path::Path;

use parking_lot::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Registry;

/// Minimum-severity levels, ordered Debug < Info < Warning < Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Keeps the daemon log writer flushing in the background. Dropping the
/// guard flushes and stops the writer thread.
pub struct LogGuard {
    _worker: Option<tracing_appender::non_blocking::WorkerGuard>,
}

static RELOAD: Mutex<Option<reload::Handle<LevelFilter, Registry>>> = Mutex::new(None);

/// Install the console sink. Returns `None` if a sink is already installed.
pub fn init_console(level: LogLevel) -> Option<LogGuard> {
    let (filter, handle) = reload::Layer::new(level.to_filter());
    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
    if result.is_err() {
        return None;
    }
    *RELOAD.lock() = Some(handle);
    Some(LogGuard { _worker: None })
}

/// Install the daemon sink writing timestamped lines to `path`. Returns
/// `None` if a sink is already installed.
pub fn init_daemon(path: &Path, level: LogLevel) -> Option<LogGuard> {
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().unwrap_or_else(|| "wp2pd.log".as_ref());
    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, worker) = tracing_appender::non_blocking(appender);

    let (filter, handle) = reload::Layer::new(level.to_filter());
    let result = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer),
        )
        .try_init();
    if result.is_err() {
        return None;
    }
    *RELOAD.lock() = Some(handle);
    Some(LogGuard { _worker: Some(worker) })
}

/// Swap the minimum level of the installed sink. Returns false when no sink
/// has been installed through this module.
pub fn set_level(level: LogLevel) -> bool {
    let guard = RELOAD.lock();
    match guard.as_ref() {
        Some(handle) => handle.modify(|filter| *filter = level.to_filter()).is_ok(),
        None => false,
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
