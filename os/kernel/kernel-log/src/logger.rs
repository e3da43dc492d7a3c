use crate::LogSink;
use kernel_sync::{SpinMutex, SyncOnceCell};
use log::{LevelFilter, Log, Metadata, Record};

/// Why [`BootLogger::install`] failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoggerError {
    #[error("the logger cell is already populated")]
    AlreadyPublished,
    #[error("another logger is already registered with `log`")]
    AlreadyRegistered,
}

/// Level-filtering logger writing one line per record to a [`LogSink`].
pub struct BootLogger<S> {
    max_level: LevelFilter,
    sink: SpinMutex<S>,
}

impl<S: LogSink> BootLogger<S> {
    #[must_use]
    pub const fn new(sink: S, max_level: LevelFilter) -> Self {
        Self {
            max_level,
            sink: SpinMutex::new(sink),
        }
    }

    /// Publish this logger in `cell` and register it as the global logger.
    ///
    /// Call once during early init.
    ///
    /// # Errors
    /// The cell was already populated, or `log` already has a logger.
    pub fn install(
        self,
        cell: &'static SyncOnceCell<Self>,
    ) -> Result<&'static Self, LoggerError>
    where
        S: 'static,
    {
        let max_level = self.max_level;
        cell.set(self).map_err(|_| LoggerError::AlreadyPublished)?;
        let Some(logger) = cell.get() else {
            return Err(LoggerError::AlreadyPublished);
        };
        log::set_logger(logger).map_err(|_| LoggerError::AlreadyRegistered)?;
        log::set_max_level(max_level);
        Ok(logger)
    }

    #[inline]
    #[must_use]
    pub const fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    /// Run `f` against the sink, e.g. to dump buffered lines.
    pub fn with_sink<U>(&self, f: impl FnOnce(&mut S) -> U) -> U {
        self.sink.with_lock(f)
    }
}

impl<S: LogSink> Log for BootLogger<S> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Best effort: a full or failing sink must not take the kernel down.
        let _ = self.sink.with_lock(|sink| {
            writeln!(sink, "[{}] {}: {}", record.level(), record.target(), record.args())
        });
    }

    fn flush(&self) {
        self.sink.with_lock(LogSink::flush);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySink;
    use log::Level;

    fn emit(logger: &BootLogger<MemorySink<4, 64>>, level: Level, msg: &str) {
        logger.log(
            &Record::builder()
                .level(level)
                .target("kernel_mm::layout")
                .args(format_args!("{msg}"))
                .build(),
        );
    }

    #[test]
    fn formats_level_target_and_message() {
        let logger = BootLogger::new(MemorySink::<4, 64>::new(), LevelFilter::Info);
        emit(&logger, Level::Info, "paged pool 64 MiB");
        let line = logger.with_sink(|s| s.lines().next().map(str::to_owned));
        assert_eq!(line.as_deref(), Some("[INFO] kernel_mm::layout: paged pool 64 MiB"));
    }

    #[test]
    fn filters_by_level() {
        let logger = BootLogger::new(MemorySink::<4, 64>::new(), LevelFilter::Warn);
        emit(&logger, Level::Debug, "dropped");
        emit(&logger, Level::Error, "kept");
        assert_eq!(logger.with_sink(|s| s.len()), 1);
    }
}
