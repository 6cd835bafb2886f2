//! Logging for the store.
//!
//! Every event goes to `tracing` under the `tsb_store` target, with its
//! key/value pairs as structured fields. When the client supplies a
//! [`LogFunction`], events at or above the client's minimum level are also
//! formatted into a single line and handed to that callback:
//!
//! ```text
//! [TSB][WARN][ThreadId(2)][tsb_store::store][store.rs:212] msg="File does not exist" path="/tsb/1/a/b.ts"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Write as _};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug detail. Also used for routine outcomes such as `NoSpace`.
    Trace,
    /// The operation continues, but through an unusual path.
    Warn,
    /// Milestone: a significant operation completed (construction, flush).
    Mil,
    /// The operation cannot continue.
    Error,
}

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Warn => "WARN",
            LogLevel::Mil => "MIL",
            LogLevel::Error => "ERROR",
        }
    }

    /// The `tracing` level events at this level are emitted with.
    pub const fn tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Mil => tracing::Level::INFO,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "warn" => Ok(LogLevel::Warn),
            "mil" => Ok(LogLevel::Mil),
            "error" => Ok(LogLevel::Error),
            other => Err(format!(
                "unknown log level '{other}' (expected trace, warn, mil or error)"
            )),
        }
    }
}

/// Client log sink. Receives one fully formatted line per event and must not panic.
pub type LogFunction = Arc<dyn Fn(String) + Send + Sync>;

/// Call-site metadata captured by the logging macro.
#[derive(Debug, Clone, Copy)]
pub struct Site {
    pub module: &'static str,
    pub file: &'static str,
    pub line: u32,
}

pub type Field<'a> = (&'static str, &'a dyn Display);

#[derive(Clone)]
pub struct Logger {
    func: Option<LogFunction>,
    min_level: LogLevel,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("callback", &self.func.is_some())
            .field("min_level", &self.min_level)
            .finish()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::tracing_only()
    }
}

impl Logger {
    pub fn new(func: LogFunction, min_level: LogLevel) -> Self {
        Self {
            func: Some(func),
            min_level,
        }
    }

    /// A logger without a client callback; events only reach `tracing`.
    pub fn tracing_only() -> Self {
        Self {
            func: None,
            min_level: LogLevel::Trace,
        }
    }

    #[inline]
    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    /// Whether the client callback would receive an event at `level`.
    #[inline]
    pub fn enabled(&self, level: LogLevel) -> bool {
        self.func.is_some() && level >= self.min_level
    }

    /// Hand one event to the client callback, if it wants this level.
    /// The `tracing` side is emitted by [`tsb_log!`] at the call site.
    pub fn log(&self, level: LogLevel, site: Site, msg: &str, fields: &[Field<'_>]) {
        if let Some(func) = self.func.as_ref().filter(|_| level >= self.min_level) {
            func(format_message(level, site, msg, fields));
        }
    }
}

struct Fields<'a, 'b>(&'a [Field<'b>]);

impl Display for Fields<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.0 {
            write!(f, " {key}=\"{value}\"")?;
        }
        Ok(())
    }
}

/// Format one event the way the client callback receives it.
pub fn format_message(level: LogLevel, site: Site, msg: &str, fields: &[Field<'_>]) -> String {
    let file = site.file.rsplit(['/', '\\']).next().unwrap_or(site.file);
    let mut out = String::with_capacity(96 + msg.len());
    let _ = write!(
        out,
        "[TSB][{}][{:?}][{}][{}:{}] msg=\"{}\"{}",
        level.tag(),
        std::thread::current().id(),
        site.module,
        file,
        site.line,
        msg,
        Fields(fields)
    );
    out
}

/// Log through a [`Logger`]: `tsb_log!(logger, Warn, "message", "key" => value, ...)`.
///
/// Emits a `tracing` event with each pair as a display field, then passes the
/// same event to the client callback.
macro_rules! tsb_log {
    ($logger:expr, $level:ident, $msg:literal $(, $key:literal => $value:expr)* $(,)?) => {{
        ::tracing::event!(
            target: "tsb_store",
            $crate::log::LogLevel::$level.tracing_level(),
            { $($key = %$value,)* },
            "{}",
            $msg
        );
        let logger: &$crate::log::Logger = &$logger;
        if logger.enabled($crate::log::LogLevel::$level) {
            logger.log(
                $crate::log::LogLevel::$level,
                $crate::log::Site {
                    module: module_path!(),
                    file: file!(),
                    line: line!(),
                },
                $msg,
                &[$(($key, &$value as &dyn ::std::fmt::Display)),*],
            );
        }
    }};
}

pub(crate) use tsb_log;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capture(min_level: LogLevel) -> (Logger, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let logger = Logger::new(
            Arc::new(move |line| sink.lock().unwrap().push(line)),
            min_level,
        );
        (logger, lines)
    }

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(LogLevel::Trace < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Mil);
        assert!(LogLevel::Mil < LogLevel::Error);
    }

    #[test]
    fn parse_levels() {
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("MIL".parse::<LogLevel>().unwrap(), LogLevel::Mil);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn message_contains_metadata_and_fields() {
        let site = Site {
            module: "tsb_store::store",
            file: "crates/tsb-store/src/store.rs",
            line: 42,
        };
        let size = 500_000u64;
        let line = format_message(
            LogLevel::Error,
            site,
            "Failed to write",
            &[("path", &"/tsb/1/a.ts"), ("size", &size)],
        );
        assert!(line.starts_with("[TSB][ERROR][ThreadId("));
        assert!(line.contains("[tsb_store::store][store.rs:42]"));
        assert!(line.contains("msg=\"Failed to write\""));
        assert!(line.ends_with("path=\"/tsb/1/a.ts\" size=\"500000\""));
    }

    #[test]
    fn callback_respects_min_level() {
        let (logger, lines) = capture(LogLevel::Warn);
        tsb_log!(logger, Trace, "hidden");
        tsb_log!(logger, Warn, "shown", "key" => 1);
        tsb_log!(logger, Error, "also shown");

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[WARN]"));
        assert!(lines[0].contains("key=\"1\""));
        assert!(lines[1].contains("[ERROR]"));
    }

    #[test]
    fn tracing_levels_follow_severity() {
        assert_eq!(LogLevel::Trace.tracing_level(), tracing::Level::TRACE);
        assert_eq!(LogLevel::Warn.tracing_level(), tracing::Level::WARN);
        assert_eq!(LogLevel::Mil.tracing_level(), tracing::Level::INFO);
        assert_eq!(LogLevel::Error.tracing_level(), tracing::Level::ERROR);
    }

    /// Records the field names of every event it sees.
    struct FieldNames(Arc<Mutex<Vec<&'static str>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for FieldNames {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut names = self.0.lock().unwrap();
            names.extend(event.metadata().fields().iter().map(|f| f.name()));
        }
    }

    #[test]
    fn tracing_event_carries_structured_fields() {
        use tracing_subscriber::layer::SubscriberExt;

        let names = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(FieldNames(Arc::clone(&names)));
        tracing::subscriber::with_default(subscriber, || {
            let logger = Logger::tracing_only();
            tsb_log!(logger, Warn, "File does not exist",
                "path" => "/tsb/1/a.ts", "file_size" => 3);
        });

        assert_eq!(*names.lock().unwrap(), ["message", "path", "file_size"]);
    }

    #[test]
    fn tracing_only_logger_has_no_callback() {
        let logger = Logger::tracing_only();
        assert!(!logger.enabled(LogLevel::Error));
        tsb_log!(logger, Mil, "goes to tracing only");
    }
}
