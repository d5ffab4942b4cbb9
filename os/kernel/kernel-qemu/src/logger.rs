use crate::{DebugconSink, TraceSink};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` backend writing one line per record to a [`TraceSink`].
pub struct QemuLogger<S = DebugconSink> {
    max_level: LevelFilter,
    sink: S,
}

impl QemuLogger<DebugconSink> {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self::with_sink(max_level, DebugconSink)
    }
}

impl<S: TraceSink> QemuLogger<S> {
    #[must_use]
    pub const fn with_sink(max_level: LevelFilter, sink: S) -> Self {
        Self { max_level, sink }
    }

    #[must_use]
    pub const fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Registers this logger as the global `log` backend.
    ///
    /// Call once during early init; the logger must live in a `static`.
    ///
    /// # Errors
    /// Fails if a global logger has already been set.
    pub fn install(&'static self) -> Result<(), SetLoggerError>
    where
        S: 'static,
    {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

impl<S: TraceSink> Log for QemuLogger<S> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        self.sink.write_args(format_args!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}
