use sentry_tracing::{EventFilter, SentryLayer};
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, registry::LookupSpan};

const DEFAULT_FILTER: &str = "info,sqlx=warn,tower_http=info";

/// Starts sentry when a DSN is configured. Keep the guard alive for the
/// lifetime of the process so buffered events get flushed.
pub fn init_sentry(dsn: Option<&str>, environment: &str) -> Option<sentry::ClientInitGuard> {
    let dsn = dsn.filter(|d| !d.trim().is_empty())?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(environment.to_string().into()),
            ..Default::default()
        },
    )))
}

pub fn sentry_layer<S>() -> SentryLayer<S>
where
    S: tracing::Subscriber,
    S: for<'a> LookupSpan<'a>,
{
    SentryLayer::default().event_filter(|meta| match *meta.level() {
        Level::ERROR => EventFilter::Event,
        Level::WARN | Level::INFO => EventFilter::Breadcrumb,
        _ => EventFilter::Ignore,
    })
}

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(sentry_layer())
        .init();
}
