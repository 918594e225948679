//! Initialize telemetry in podium services.
//!
//! # Examples
//! ```no_run
//! # struct Metrics;
//! # impl podium_telemetry::Metrics for Metrics {
//! #     type Config = ();
//! #     fn register(_: &Self::Config) -> Self { Self }
//! # }
//! let metrics: &'static Metrics = podium_telemetry::configure()
//!     .set_filter_directives("info")
//!     .try_init::<Metrics>(&())
//!     .expect("must be able to initialize telemetry");
//! tracing::info!("telemetry initialized");
//! ```
use std::io::IsTerminal as _;

pub use metrics::Metrics;
use tracing_subscriber::{
    filter::{
        LevelFilter,
        ParseError,
    },
    fmt::{
        writer::BoxMakeWriter,
        MakeWriter,
    },
    layer::SubscriberExt as _,
    util::{
        SubscriberInitExt as _,
        TryInitError,
    },
    EnvFilter,
};

#[doc(hidden)]
pub mod macros;
pub mod metrics;

/// The errors that can occur when initializing telemetry.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn filter_directives(source: ParseError) -> Self {
        Self(ErrorKind::FilterDirectives(source))
    }

    fn init_subscriber(source: TryInitError) -> Self {
        Self(ErrorKind::InitSubscriber(source))
    }
}

impl From<metrics::Error> for Error {
    fn from(source: metrics::Error) -> Self {
        Self(ErrorKind::Metrics(source))
    }
}

#[derive(Debug, thiserror::Error)]
enum ErrorKind {
    #[error("failed to parse filter directives")]
    FilterDirectives(#[source] ParseError),
    #[error("failed installing global tracing subscriber")]
    InitSubscriber(#[source] TryInitError),
    #[error(transparent)]
    Metrics(#[from] metrics::Error),
}

#[must_use = "the telemetry config must be initialized to be useful"]
pub fn configure() -> Config {
    Config::new()
}

pub struct Config {
    filter_directives: String,
    force_stdout: bool,
    pretty_print: bool,
    stdout_writer: BoxMakeWriter,
    exporter: Option<metrics::ExporterConfig>,
}

impl Config {
    #[must_use = "telemetry must be initialized to be useful"]
    fn new() -> Self {
        Self {
            filter_directives: String::new(),
            force_stdout: false,
            pretty_print: false,
            stdout_writer: BoxMakeWriter::new(std::io::stdout),
            exporter: None,
        }
    }
}

impl Config {
    #[must_use = "telemetry must be initialized to be useful"]
    pub fn set_filter_directives(mut self, filter_directives: &str) -> Self {
        self.filter_directives = filter_directives.to_string();
        self
    }

    /// Pretty printing is only honoured if stdout is a tty or if this is set.
    #[must_use = "telemetry must be initialized to be useful"]
    pub fn set_force_stdout(mut self, force_stdout: bool) -> Self {
        self.force_stdout = force_stdout;
        self
    }

    #[must_use = "telemetry must be initialized to be useful"]
    pub fn set_pretty_print(mut self, pretty_print: bool) -> Self {
        self.pretty_print = pretty_print;
        self
    }

    #[must_use = "telemetry must be initialized to be useful"]
    pub fn set_stdout_writer<M>(mut self, stdout_writer: M) -> Self
    where
        M: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        self.stdout_writer = BoxMakeWriter::new(stdout_writer);
        self
    }

    #[must_use = "telemetry must be initialized to be useful"]
    pub fn set_metrics(mut self, listening_addr: &str, service_name: &str) -> Self {
        self.exporter = Some(metrics::ExporterConfig {
            service_name: service_name.to_string(),
            listening_address: listening_addr.to_string(),
        });
        self
    }

    /// Initialize telemetry, consuming the config.
    ///
    /// The returned metrics live for the remainder of the program.
    ///
    /// # Errors
    /// Fails if the filter directives could not be parsed, if the prometheus exporter
    /// could not be installed, or if the global tracing subscriber could not be installed.
    pub fn try_init<T: Metrics>(self, config: &T::Config) -> Result<&'static T, Error> {
        let Self {
            filter_directives,
            force_stdout,
            pretty_print,
            stdout_writer,
            exporter,
        } = self;

        let env_filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse(filter_directives)
            .map_err(Error::filter_directives)?;

        let pretty = pretty_print && (force_stdout || std::io::stdout().is_terminal());
        let (pretty_printer, json_printer) = if pretty {
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(stdout_writer);
            (Some(layer), None)
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_writer(stdout_writer);
            (None, Some(layer))
        };

        tracing_subscriber::registry()
            .with(pretty_printer)
            .with(json_printer)
            .with(env_filter)
            .try_init()
            .map_err(Error::init_subscriber)?;

        if let Some(exporter) = exporter {
            exporter.install::<T>(config)?;
        }

        Ok(Box::leak(Box::new(T::register(config))))
    }
}
