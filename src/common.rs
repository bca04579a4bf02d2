// Licensed under the Apache-2.0 license

//! Crate-wide helpers shared by the driver modules.
//!
//! The engine never formats anything unless a real [`Logger`] is plugged in; the default
//! [`NoOpLogger`] compiles every call away.

use core::fmt;

/// Sink for driver diagnostics.
///
/// Implementations decide where messages go (RTT, UART, a test buffer). Calls are made
/// from the poll path, so implementations must not block for long.
pub trait Logger {
    /// State transitions and scheduling decisions.
    fn debug(&mut self, args: fmt::Arguments<'_>);

    /// Recoverable anomalies such as a retry period expiring.
    fn warn(&mut self, args: fmt::Arguments<'_>);

    /// Aborted transactions.
    fn error(&mut self, args: fmt::Arguments<'_>);
}

/// Logger that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    #[inline]
    fn debug(&mut self, _args: fmt::Arguments<'_>) {}

    #[inline]
    fn warn(&mut self, _args: fmt::Arguments<'_>) {}

    #[inline]
    fn error(&mut self, _args: fmt::Arguments<'_>) {}
}

/// Logger that forwards to the `defmt` global logger.
#[cfg(feature = "defmt")]
#[derive(Clone, Copy, Debug, Default)]
pub struct DefmtLogger;

#[cfg(feature = "defmt")]
impl Logger for DefmtLogger {
    fn debug(&mut self, args: fmt::Arguments<'_>) {
        defmt::debug!("{}", defmt::Display2Format(&args));
    }

    fn warn(&mut self, args: fmt::Arguments<'_>) {
        defmt::warn!("{}", defmt::Display2Format(&args));
    }

    fn error(&mut self, args: fmt::Arguments<'_>) {
        defmt::error!("{}", defmt::Display2Format(&args));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::string::{String, ToString};
    use std::vec::Vec;

    /// Captures formatted messages with a level prefix.
    #[derive(Default)]
    pub(crate) struct RecordingLogger {
        pub(crate) lines: Vec<String>,
    }

    impl RecordingLogger {
        pub(crate) fn contains(&self, needle: &str) -> bool {
            self.lines.iter().any(|line| line.contains(needle))
        }
    }

    impl Logger for RecordingLogger {
        fn debug(&mut self, args: fmt::Arguments<'_>) {
            self.lines.push(std::format!("DEBUG {args}"));
        }

        fn warn(&mut self, args: fmt::Arguments<'_>) {
            self.lines.push(std::format!("WARN {args}"));
        }

        fn error(&mut self, args: fmt::Arguments<'_>) {
            self.lines.push(std::format!("ERROR {args}"));
        }
    }

    #[test]
    fn test_recording_logger_prefixes_levels() {
        let mut logger = RecordingLogger::default();
        logger.debug(format_args!("state {}", 1));
        logger.error(format_args!("abort"));

        assert_eq!(logger.lines[0], "DEBUG state 1".to_string());
        assert!(logger.contains("ERROR abort"));
    }

    #[test]
    fn test_noop_logger_accepts_everything() {
        let mut logger = NoOpLogger;
        logger.debug(format_args!("ignored {}", 42));
        logger.warn(format_args!("ignored"));
        logger.error(format_args!("ignored"));
    }
}
