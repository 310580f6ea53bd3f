//! slog setup for the process embedding the engine.
//!
//! Production gets MozLog JSON on stdout; `human_logs` switches to plain
//! terminal output filtered through the env logger. Either way the logger
//! lands in `slog_scope` so the crate's log macros work everywhere,
//! including the flush worker task.

use std::io;

use slog::{self, Drain};
use slog_mozlog_json::MozLogJson;

use crate::errors::Result;

pub fn init_logging(human_logs: bool) -> Result<()> {
    let logger = if human_logs {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_envlogger::new(drain).fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!())
    } else {
        let drain = MozLogJson::new(io::stdout())
            .logger_name(concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION")).to_owned())
            .msg_type(concat!(env!("CARGO_PKG_NAME"), ":log").to_owned())
            .hostname(hostname())
            .build()
            .fuse();
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!())
    };
    // slog_scope's unset default panics on first use; never let it reset to
    // that, reset_logging installs a Discard logger instead.
    slog_scope::set_global_logger(logger).cancel_reset();
    slog_stdlog::init().ok();
    Ok(())
}

/// Swap the global logger for a Discard one. Used during shutdown and by
/// tests that exercise logging paths without a real drain.
pub fn reset_logging() {
    let logger = slog::Logger::root(slog::Discard, o!());
    slog_scope::set_global_logger(logger).cancel_reset();
}

fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}
