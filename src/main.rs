use anyhow::Result;
use clap::Parser;
use colored::{Color, Colorize};
use live_reload::application::services::orchestrator::DevServer;
use live_reload::command::{Command, Subcommand};
use live_reload::config::ConfigLoader;
use live_reload::init_tracing;
use live_reload::interfaces::websocket::server::LIVE_RELOAD_PATH;
use tracing::{debug, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let command = Command::parse();

    match command.subcommand {
        Subcommand::Serve(args) => {
            let config = ConfigLoader::load(&args)?;
            init_tracing(&config.log_level)?;
            debug!("serve config: {:?}", config);

            let server = DevServer::new(config.clone()).start().await?;

            println!(
                "serving {} at {}",
                config.root.display().to_string().color(Color::Cyan),
                format!("http://{}", server.asset_addr()).color(Color::Green)
            );
            println!(
                "live reload on {}, watching {}",
                format!("ws://{}{}", server.notify_addr(), LIVE_RELOAD_PATH).color(Color::Green),
                config.extensions.join(", ").color(Color::Yellow)
            );
            println!("press {} to stop", "Ctrl-C".bold());

            server
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!("failed to listen for Ctrl-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                })
                .await;
        }
    }
    Ok(())
}
