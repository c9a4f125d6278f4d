//! Logging setup with indicatif integration

use indicatif::MultiProgress;
use log::LevelFilter;

/// ANSI color code and padded label for a log level.
fn level_style(level: log::Level, color: bool) -> (&'static str, &'static str, &'static str) {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return ("", label, "");
    }
    let ansi = match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    };
    (ansi, label, "\x1b[0m")
}

/// Logger that prints through indicatif MultiProgress to avoid mixing with progress bars.
pub struct IndicatifLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(inner: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { inner, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.inner.enabled(record.metadata()) {
            let (pre, label, post) = level_style(record.level(), true);
            let line = format!("[{pre}{label}{post}] {}", record.args());
            self.multi.suspend(|| eprintln!("{line}"));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Initialize logging at `level`; `RUST_LOG` takes precedence when set.
///
/// With `multi`, log lines are printed above the progress bars.
/// Calling this twice is harmless: the second logger is discarded.
pub fn init_logging(level: LevelFilter, multi: Option<&MultiProgress>) {
    use std::io::Write;

    let default_level = level.as_str().to_ascii_lowercase();
    let env = env_logger::Env::default().default_filter_or(default_level);

    if let Some(multi) = multi {
        let logger = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .build();
        let max_level = logger.filter();

        if log::set_boxed_logger(Box::new(IndicatifLogger::new(logger, multi.clone()))).is_ok() {
            log::set_max_level(max_level);
        }
    } else {
        // Non-TTY: no ANSI colors, plain lines for log aggregation
        let _ = env_logger::Builder::from_env(env)
            .format(|buf, record| {
                let (_, label, _) = level_style(record.level(), false);
                writeln!(buf, "[{label}] {}", record.args())
            })
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_style_has_no_ansi() {
        let (pre, label, post) = level_style(log::Level::Warn, false);
        assert_eq!((pre, label, post), ("", "WARN ", ""));
    }

    #[test]
    fn color_style_wraps_label() {
        let (pre, label, post) = level_style(log::Level::Error, true);
        assert_eq!(pre, "\x1b[31m");
        assert_eq!(label, "ERROR");
        assert_eq!(post, "\x1b[0m");
    }

    #[test]
    fn init_twice_does_not_panic() {
        init_logging(LevelFilter::Info, None);
        init_logging(LevelFilter::Debug, None);
    }
}
