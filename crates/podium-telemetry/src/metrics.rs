use std::net::{
    AddrParseError,
    SocketAddr,
};

use metrics_exporter_prometheus::{
    BuildError,
    Matcher,
    PrometheusBuilder,
};

/// A collection of metrics handles owned by a service.
///
/// Implementors obtain their handles through the `metrics` macros inside
/// [`Metrics::register`]. If no exporter was installed the handles are no-ops,
/// which is what unit tests rely on.
pub trait Metrics {
    type Config;

    /// Histogram names and the bucket boundaries they should be exported with.
    ///
    /// Histograms not listed here are rendered as Prometheus summaries.
    fn buckets(_config: &Self::Config) -> Vec<(&'static str, Vec<f64>)> {
        Vec::new()
    }

    fn register(config: &Self::Config) -> Self
    where
        Self: Sized;
}

/// An error related to initializing metrics.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to parse metrics exporter listening address")]
    ParseListeningAddress(#[from] AddrParseError),

    #[error("the buckets for histogram `{0}` must have at least one value")]
    EmptyBuckets(&'static str),

    #[error("failed to install the prometheus exporter")]
    Install(#[source] BuildError),
}

pub(crate) struct ExporterConfig {
    pub(crate) service_name: String,
    pub(crate) listening_address: String,
}

impl ExporterConfig {
    /// Installs the global prometheus recorder and starts its http listener.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn install<T: Metrics>(self, config: &T::Config) -> Result<(), Error> {
        let Self {
            service_name,
            listening_address,
        } = self;

        let addr: SocketAddr = listening_address.parse()?;
        let mut builder = PrometheusBuilder::new().with_http_listener(addr);
        if !service_name.is_empty() {
            builder = builder.add_global_label("service", service_name);
        }
        for (name, values) in T::buckets(config) {
            builder = builder
                .set_buckets_for_metric(Matcher::Full(name.to_string()), &values)
                .map_err(|_| Error::EmptyBuckets(name))?;
        }
        builder.install().map_err(Error::Install)
    }
}
