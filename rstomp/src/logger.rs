use slog::{o, Drain, Logger};

use crate::Result;

/// Installs the process-wide logger and bridges the `log` macros into it.
///
/// Keep the returned guard alive for the lifetime of the process.
pub fn logger_init(level: log::Level) -> Result<slog_scope::GlobalLoggerGuard> {
    let guard = slog_scope::set_global_logger(config_logger(level));
    slog_stdlog::init_with_level(level)?;
    Ok(guard)
}

pub fn config_logger(level: log::Level) -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, log_to_slog_level(level)).ignore_res();

    let drain = slog_async::Async::new(drain)
        .chan_size(4096 * 4)
        .overflow_strategy(slog_async::OverflowStrategy::DropAndReport)
        .build()
        .fuse();

    Logger::root(drain, o!())
}

fn log_to_slog_level(level: log::Level) -> slog::Level {
    match level {
        log::Level::Trace => slog::Level::Trace,
        log::Level::Debug => slog::Level::Debug,
        log::Level::Info => slog::Level::Info,
        log::Level::Warn => slog::Level::Warning,
        log::Level::Error => slog::Level::Error,
    }
}
