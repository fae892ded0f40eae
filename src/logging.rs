//! Name-scoped loggers on top of `tracing`.
//!
//! A [`LoggerRegistry`] hands out one [`Logger`] per name. Each registry owns
//! its own sink, a `tracing` [`Dispatch`] built on first use, and every record
//! from its loggers is emitted into that sink only. The process-wide default
//! subscriber is never installed or written to, so applications keep full
//! control of their own `tracing` setup.

use std::{
    collections::HashMap,
    error::Error as StdError,
    fmt::{self, Write as _},
    sync::{Arc, Mutex, OnceLock, PoisonError, RwLock},
};

use tracing::{dispatcher, level_filters::LevelFilter, Dispatch, Level};
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the sink filter directive.
pub const LOG_ENV: &str = "RESILIENT_HTTP_LOG";

/// Structured key/value context attached to a record.
pub type Context = serde_json::Map<String, serde_json::Value>;

type SinkFactory = Box<dyn Fn(&LoggerConfig) -> Dispatch + Send + Sync>;

/// Sink configuration applied once per registry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoggerConfig {
    /// Default threshold for loggers created by [`LoggerRegistry::get`].
    pub level: Level,
    /// Emit JSON lines instead of human-readable text.
    pub json: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json: false,
        }
    }
}

/// Get-or-create registry of named loggers sharing one private sink.
pub struct LoggerRegistry {
    config: LoggerConfig,
    loggers: Mutex<HashMap<String, Logger>>,
    sink: OnceLock<Dispatch>,
    make_sink: SinkFactory,
}

impl fmt::Debug for LoggerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerRegistry")
            .field("config", &self.config)
            .field("loggers", &self.len())
            .field("sink_initialized", &self.sink.get().is_some())
            .finish()
    }
}

impl LoggerRegistry {
    /// Registry writing to stderr through a `tracing-subscriber` fmt sink.
    pub fn new(config: LoggerConfig) -> Self {
        Self::with_sink(config, fmt_sink)
    }

    /// Registry whose sink is produced by `make_sink` on first use.
    ///
    /// Use this to route records into a custom subscriber, e.g. one built from
    /// the application's own layers.
    pub fn with_sink<F>(config: LoggerConfig, make_sink: F) -> Self
    where
        F: Fn(&LoggerConfig) -> Dispatch + Send + Sync + 'static,
    {
        Self {
            config,
            loggers: Mutex::new(HashMap::new()),
            sink: OnceLock::new(),
            make_sink: Box::new(make_sink),
        }
    }

    /// Process-wide registry with [`LoggerConfig::default`].
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<LoggerRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| Self::new(LoggerConfig::default()))
    }

    /// Configuration the sink was (or will be) built from.
    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Returns the logger for `name`, creating it on first use.
    ///
    /// Repeated calls return handles to the same logger.
    pub fn get(&self, name: &str) -> Logger {
        let sink = self.sink();
        let mut loggers = self.loggers.lock().unwrap_or_else(PoisonError::into_inner);
        loggers
            .entry(name.to_owned())
            .or_insert_with(|| Logger::new(name, self.config.level, sink.clone()))
            .clone()
    }

    /// Like [`get`](Self::get), then sets the logger's threshold to `level`.
    pub fn get_with_level(&self, name: &str, level: Level) -> Logger {
        let logger = self.get(name);
        logger.set_level(level);
        logger
    }

    /// Number of distinct loggers created so far.
    pub fn len(&self) -> usize {
        self.loggers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when no logger has been requested yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sink(&self) -> &Dispatch {
        self.sink.get_or_init(|| (self.make_sink)(&self.config))
    }
}

fn fmt_sink(config: &LoggerConfig) -> Dispatch {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.level).into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    if config.json {
        Dispatch::new(
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .finish(),
        )
    } else {
        Dispatch::new(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .finish(),
        )
    }
}

#[derive(Debug)]
struct LoggerInner {
    name: String,
    level: RwLock<Level>,
    sink: Dispatch,
}

/// Cheap-to-clone handle for a named logger.
#[derive(Clone, Debug)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    fn new(name: &str, level: Level, sink: Dispatch) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                name: name.to_owned(),
                level: RwLock::new(level),
                sink,
            }),
        }
    }

    /// Name the logger was registered under.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current threshold.
    pub fn level(&self) -> Level {
        *self
            .inner
            .level
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Changes the threshold for every handle of this logger.
    pub fn set_level(&self, level: Level) {
        *self
            .inner
            .level
            .write()
            .unwrap_or_else(PoisonError::into_inner) = level;
    }

    /// Whether a record at `level` passes this logger's own threshold.
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level()
    }

    /// Returns `true` when both handles refer to the same registered logger.
    pub fn same_as(&self, other: &Logger) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Emits an info record.
    pub fn info(&self, message: &str, context: Option<&Context>) {
        self.emit(Level::INFO, message, None, context);
    }

    /// Emits a warning record.
    pub fn warning(&self, message: &str, context: Option<&Context>) {
        self.emit(Level::WARN, message, None, context);
    }

    /// Emits an error record, optionally with an attached error.
    pub fn error(
        &self,
        message: &str,
        error: Option<&(dyn StdError + 'static)>,
        context: Option<&Context>,
    ) {
        self.emit(Level::ERROR, message, error.map(render_error_chain), context);
    }

    /// Logs at error level with the full source chain of `error` attached.
    pub fn exception(
        &self,
        message: &str,
        error: &(dyn StdError + 'static),
        context: Option<&Context>,
    ) {
        self.emit(Level::ERROR, message, Some(render_error_chain(error)), context);
    }

    fn emit(&self, level: Level, message: &str, error: Option<String>, context: Option<&Context>) {
        if !self.enabled(level) {
            return;
        }
        let name = self.inner.name.as_str();
        let context = context.map(|fields| serde_json::Value::Object(fields.clone()).to_string());
        let context = context.as_deref();
        let error = error.as_deref();

        dispatcher::with_default(&self.inner.sink, || match level {
            Level::ERROR => tracing::error!(logger = name, context, error, "{message}"),
            Level::WARN => tracing::warn!(logger = name, context, error, "{message}"),
            Level::INFO => tracing::info!(logger = name, context, error, "{message}"),
            Level::DEBUG => tracing::debug!(logger = name, context, error, "{message}"),
            _ => tracing::trace!(logger = name, context, error, "{message}"),
        });
    }
}

/// Renders `error` and its `source()` chain as `outer: caused by: inner`.
pub fn render_error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(rendered, ": caused by: {cause}");
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        fmt,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
    };

    use tracing::{
        field::{Field, Visit},
        Dispatch, Event, Level, Subscriber,
    };
    use tracing_subscriber::{layer::SubscriberExt, Layer};

    use super::{render_error_chain, Context, LoggerConfig, LoggerRegistry};
    use crate::TransportError;

    #[derive(Debug)]
    struct Record {
        level: Level,
        fields: HashMap<String, String>,
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<Record>>>);

    impl Capture {
        fn records(&self) -> std::sync::MutexGuard<'_, Vec<Record>> {
            self.0.lock().expect("capture mutex must not be poisoned")
        }

        fn dispatch(&self) -> Dispatch {
            Dispatch::new(tracing_subscriber::registry().with(self.clone()))
        }
    }

    #[derive(Default)]
    struct Fields(HashMap<String, String>);

    impl Visit for Fields {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.insert(field.name().to_owned(), value.to_owned());
        }

        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.insert(field.name().to_owned(), format!("{value:?}"));
        }
    }

    impl<S: Subscriber> Layer<S> for Capture {
        fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            let mut fields = Fields::default();
            event.record(&mut fields);
            self.records().push(Record {
                level: *event.metadata().level(),
                fields: fields.0,
            });
        }
    }

    fn capturing_registry(level: Level) -> (LoggerRegistry, Capture) {
        let capture = Capture::default();
        let sink = capture.clone();
        let registry = LoggerRegistry::with_sink(
            LoggerConfig {
                level,
                json: false,
            },
            move |_| sink.dispatch(),
        );
        (registry, capture)
    }

    #[test]
    fn get_is_idempotent_per_name() {
        let registry = LoggerRegistry::new(LoggerConfig::default());
        let first = registry.get("etl.extract");
        let second = registry.get("etl.extract");
        let other = registry.get("etl.load");

        assert!(first.same_as(&second));
        assert!(!first.same_as(&other));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn sink_is_built_once_per_registry() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let registry = LoggerRegistry::with_sink(LoggerConfig::default(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Dispatch::new(tracing_subscriber::registry())
        });

        assert_eq!(builds.load(Ordering::SeqCst), 0);
        registry.get("a");
        registry.get("a");
        registry.get("b");
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn records_carry_name_context_and_error_chain() {
        let (registry, capture) = capturing_registry(Level::INFO);
        let logger = registry.get("etl.extract");
        let mut context = Context::new();
        context.insert("attempt".to_owned(), 1.into());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = TransportError::Connect(Box::new(io));

        logger.warning("retrying", Some(&context));
        logger.exception("gave up", &err, None);

        let records = capture.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, Level::WARN);
        assert_eq!(records[0].fields["message"], "retrying");
        assert_eq!(records[0].fields["logger"], "etl.extract");
        assert_eq!(records[0].fields["context"], r#"{"attempt":1}"#);
        assert!(!records[0].fields.contains_key("error"));
        assert_eq!(records[1].level, Level::ERROR);
        assert!(records[1].fields["error"].contains("caused by: refused"));
    }

    #[test]
    fn logger_threshold_drops_verbose_records() {
        let (registry, capture) = capturing_registry(Level::WARN);
        let logger = registry.get("quiet");

        logger.info("dropped", None);
        logger.warning("kept", None);
        logger.error("kept too", None, None);

        let levels: Vec<Level> = capture.records().iter().map(|record| record.level).collect();
        assert_eq!(levels, vec![Level::WARN, Level::ERROR]);
        assert!(!logger.enabled(Level::DEBUG));
    }

    #[test]
    fn get_with_level_overrides_threshold_per_name() {
        let (registry, capture) = capturing_registry(Level::INFO);
        let verbose = registry.get_with_level("verbose", Level::DEBUG);
        let terse = registry.get_with_level("terse", Level::ERROR);

        assert_eq!(verbose.level(), Level::DEBUG);
        assert_eq!(terse.level(), Level::ERROR);
        assert!(registry.get("verbose").same_as(&verbose));

        terse.warning("dropped", None);
        verbose.info("kept", None);
        assert_eq!(capture.records().len(), 1);
    }

    #[test]
    fn records_do_not_reach_the_ambient_subscriber() {
        let (registry, registry_capture) = capturing_registry(Level::INFO);
        let ambient = Capture::default();
        let logger = registry.get("scoped");

        tracing::dispatcher::with_default(&ambient.dispatch(), || {
            logger.info("only in the registry sink", None);
        });

        assert_eq!(registry_capture.records().len(), 1);
        assert!(ambient.records().is_empty());
    }

    #[test]
    fn error_chain_includes_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = TransportError::Connect(Box::new(io));
        let rendered = render_error_chain(&err);

        assert!(rendered.starts_with("connection failed: refused"));
        assert!(rendered.ends_with("caused by: refused"));
    }
}
