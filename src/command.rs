use std::path::PathBuf;

#[derive(Debug, clap::Parser)]
#[command(name = "live-reload", version, about = "Static file server with browser live reload")]
pub struct Command {
    #[command(subcommand)]
    pub subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    /// Serve a directory and reload connected browsers when files change
    #[command(name = "serve")]
    Serve(ServeArgs),
}

/// Flags left unset fall through to the environment, the config file and
/// then the built-in defaults.
#[derive(Debug, Default, Clone, clap::Args)]
pub struct ServeArgs {
    /// Directory to serve and watch
    #[arg(short, long)]
    pub root: Option<PathBuf>,
    #[arg(long)]
    pub host: Option<String>,
    /// HTTP port for static files
    #[arg(short, long)]
    pub port: Option<u16>,
    /// WebSocket port for reload notifications
    #[arg(short, long)]
    pub notify_port: Option<u16>,
    /// Minimum interval between two reloads
    #[arg(short, long)]
    pub debounce_ms: Option<u64>,
    /// File extensions that trigger a reload, comma separated
    #[arg(short, long, value_delimiter = ',')]
    pub extensions: Option<Vec<String>>,
    /// Config file (toml, yaml or json)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
}
