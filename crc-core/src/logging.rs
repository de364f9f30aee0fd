//! Structured logging setup, in the shape `flux::logging` uses in the
//! teacher codebase: a `sloggers`-built root logger, handed down to every
//! component that wants to attach its own key-value context via `log.new`.

use slog::Drain;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

pub use slog::{debug, error, info, o, warn, Logger};

/// Builds the root logger for a relay node. Console output is always
/// active; when `log_file` is `Some`, records are duplicated to a file
/// drain as well so both side channels in the spec's §6 stay populated.
pub fn init(log_file: Option<&str>) -> Logger {
    let mut console_builder = TerminalLoggerBuilder::new();
    console_builder.level(Severity::Debug);
    console_builder.destination(Destination::Stdout);
    let console_drain = console_builder
        .build()
        .expect("terminal logger must always build");

    match log_file {
        Some(path) => {
            let mut file_builder = sloggers::file::FileLoggerBuilder::new(path);
            file_builder.level(Severity::Debug);
            let file_drain = file_builder.build().expect("file logger must build");

            let duplicated = slog::Duplicate::new(console_drain, file_drain).fuse();
            let async_drain = slog_async::Async::new(duplicated)
                .build()
                .fuse();
            Logger::root(async_drain, o!("component" => "crc"))
        }
        None => {
            let async_drain = slog_async::Async::new(console_drain.fuse()).build().fuse();
            Logger::root(async_drain, o!("component" => "crc"))
        }
    }
}
