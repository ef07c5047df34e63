use log::{Level, LevelFilter};
use std::borrow::Cow;
use std::fmt;

const DEFAULT_TARGET: &str = "intake";

/// A per-request logging handle over the [`log`] facade.
///
/// The handle carries the log target, an optional request tag printed in
/// front of every message, and its own level filter, so two uploads can log
/// at different levels without touching global state.
#[derive(Debug, Clone)]
pub struct Logger {
    target: Cow<'static, str>,
    tag: Option<String>,
    level: LevelFilter,
}

impl Logger {
    /// A handle logging under the `intake` target at every level.
    pub fn new() -> Logger {
        Logger {
            target: Cow::Borrowed(DEFAULT_TARGET),
            tag: None,
            level: LevelFilter::Trace,
        }
    }

    /// A handle that drops every message.
    pub fn disabled() -> Logger {
        Logger {
            level: LevelFilter::Off,
            ..Logger::new()
        }
    }

    pub fn with_target(mut self, target: impl Into<Cow<'static, str>>) -> Logger {
        self.target = target.into();
        self
    }

    /// Prefixes every message, typically with a request id.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Logger {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_level(mut self, level: LevelFilter) -> Logger {
        self.level = level;
        self
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    pub(crate) fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }

        match &self.tag {
            Some(tag) => log::log!(target: &self.target, level, "[{}] {}", tag, args),
            None => log::log!(target: &self.target, level, "{}", args),
        }
    }

    pub(crate) fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args)
    }

    pub(crate) fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args)
    }

    pub(crate) fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args)
    }
}

impl Default for Logger {
    fn default() -> Self {
        Logger::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter() {
        let logger = Logger::new().with_level(LevelFilter::Warn);
        assert!(logger.enabled(Level::Error));
        assert!(logger.enabled(Level::Warn));
        assert!(!logger.enabled(Level::Debug));

        let logger = Logger::disabled().with_tag("req-1");
        assert!(!logger.enabled(Level::Error));
        assert_eq!(logger.level(), LevelFilter::Off);
    }
}
