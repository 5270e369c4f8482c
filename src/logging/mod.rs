// Logging module for structured logging using the tracing crate

use std::error::Error;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Output format of the stdout subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event, for log aggregation
    #[default]
    Json,
    /// Human-readable lines
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(format!(
                "unknown log format '{}' (expected json or pretty)",
                other
            )),
        }
    }
}

/// `RUST_LOG` directives, falling back to `info`
fn env_filter() -> Result<EnvFilter, Box<dyn Error>> {
    Ok(EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env()?)
}

/// Install the global tracing subscriber.
///
/// Fails if `RUST_LOG` cannot be parsed or a global subscriber is already set.
///
/// ```no_run
/// use warren::logging::{init_subscriber, LogFormat};
///
/// init_subscriber(LogFormat::Json).expect("Failed to initialize logging");
/// tracing::info!("Gateway starting");
/// ```
pub fn init_subscriber(format: LogFormat) -> Result<(), Box<dyn Error>> {
    let filter = env_filter()?;
    match format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            Registry::default().with(filter).with(
                fmt::Layer::default()
                    .json()
                    .with_current_span(false)
                    .with_target(true)
                    .with_writer(std::io::stdout),
            ),
        )?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(
            Registry::default().with(filter).with(
                fmt::Layer::default()
                    .compact()
                    .with_target(true)
                    .with_writer(std::io::stdout),
            ),
        )?,
    }
    Ok(())
}
