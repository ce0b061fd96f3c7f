use once_cell::sync::OnceCell;
use slog::{Drain, Logger as SlogLogger};
use slog_stdlog::StdLog;
use std::{borrow::Borrow, ops::Deref};

static GLOBAL_LOGGER: OnceCell<GlobalLogger> = OnceCell::new();

/// Process-wide root logger. Every engine, cache and sync core derives its own child from it.
#[derive(Debug, Clone)]
pub struct GlobalLogger {
    inner: SlogLogger,
}

impl Deref for GlobalLogger {
    type Target = SlogLogger;

    fn deref(&self) -> &Self::Target { self.inner.borrow() }
}

impl GlobalLogger {
    fn new(logger: SlogLogger) -> Self { GlobalLogger { inner: logger } }

    /// Get global logger. If you didn't call `GlobalLogger::setup` prior calling this then default
    /// logger created with `StdLog` as drain.
    pub fn get() -> &'static GlobalLogger {
        GLOBAL_LOGGER.get_or_init(|| {
            let root_logger = SlogLogger::root(StdLog.fuse(), o!());
            GlobalLogger::new(logger_from_root_logger(&root_logger))
        })
    }

    /// Set global logger. Optional.
    /// Can only called once. Returns Ok(()) if the cell was empty and Err(value) if it was full.
    pub fn setup(root_logger: &SlogLogger) -> Result<(), GlobalLogger> {
        GLOBAL_LOGGER.set(GlobalLogger::new(logger_from_root_logger(root_logger)))
    }

    /// Child logger tagged with the component that owns it.
    pub fn component(module: &'static str, implementation: &'static str) -> SlogLogger {
        GlobalLogger::get().new(o!("zettaplane_module" => module, "zettaplane_impl" => implementation))
    }
}

fn logger_from_root_logger(root_logger: &SlogLogger) -> SlogLogger {
    root_logger.new(o!("zettaplane_version" => crate::VERSION))
}
