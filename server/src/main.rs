use std::{fs, sync::Arc};

use callmesh::{config, signal::RoomRegistry};
use clap::Parser;

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

pub mod http;
pub mod signaling;

#[derive(clap::Parser)]
struct Cli {
    #[arg(short = 'c', long = "config", default_value = "./config.toml")]
    config_path: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init_timed();
    let file_content = {
        // Drop cli before server launch
        let cli = Cli::parse();
        info!("Reading config file: {}", cli.config_path);
        fs::read_to_string(cli.config_path)
    };
    let config = match &file_content {
        Ok(data) => config::load(data)
            .inspect_err(|e| error!("Error loading config data: {e}.\nLoading default config."))
            .unwrap_or_default(),
        Err(e) => {
            error!("Error loading config file: {e}.\nLoading default config.");
            config::Config::default()
        }
    }
    .with_env(|key| std::env::var(key).ok());

    info!(
        "Using {} ICE server{} for negotiation",
        config.webrtc.ice_servers.len(),
        if config.webrtc.ice_servers.len() == 1 { "" } else { "s" }
    );

    let registry = Arc::new(RoomRegistry::new());
    let signal_addr = (config.server.host.clone(), config.server.signal_port);

    tokio::try_join!(
        http::launch(&config.server, config.webrtc.ice_servers.clone()),
        signaling::server::launch(signal_addr, registry, config.server.cors_origins.clone()),
    )?;

    Ok(())
}
