//! Tracing initialization

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::LogFormat;

pub fn init_logging(level: &str, format: &LogFormat) -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let base = fmt::layer().with_target(false).with_writer(std::io::stderr);

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env)
            .with(base.json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env)
            .with(base.compact())
            .init(),
    }
    Ok(())
}
