use std::path::Path;

use tracing_subscriber::fmt;

use crate::shared::error::ServerError;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Installs the global fmt subscriber. Unknown level names fall back to `info`.
pub fn init_tracing(level: &str) -> anyhow::Result<()> {
    let level = parse_level(level);
    let subscriber = fmt::Subscriber::builder().with_max_level(level).finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("failed to set default subscriber: {}", e))?;
    Ok(())
}

fn parse_level(level: &str) -> tracing::Level {
    level
        .trim()
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO)
}

pub fn read_file(path: &Path) -> Result<String, ServerError> {
    let content = std::fs::read_to_string(path).map_err(ServerError::IoError)?;
    Ok(content)
}
