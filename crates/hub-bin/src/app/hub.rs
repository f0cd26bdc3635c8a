//! Hub role: one connection server per configured channel.

use crate::processors;
use futures_util::future::join_all;
use hub_config_and_utils::{ChannelConfig, Config};
use hub_server::{Channel, ConnectionServer, HubResult, Router, ServerConfig};
use std::sync::Arc;
use tracing::{error, info};

/// Run the hub until Ctrl-C.
pub async fn run_hub(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let router = Arc::new(Router::new());
    processors::register_builtin(&router, &config.channels).await;

    let servers = start_servers(&config.channels, &router).await?;
    info!(channels = servers.len(), "Hub running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    stop_all(&servers).await;
    info!("Hub stopped");
    Ok(())
}

/// Start a server per channel. If any bind fails, the servers already
/// started are stopped and the error is returned.
async fn start_servers(
    channels: &[ChannelConfig],
    router: &Arc<Router>,
) -> HubResult<Vec<ConnectionServer>> {
    let mut servers = Vec::with_capacity(channels.len());
    for channel in channels {
        let server = ConnectionServer::new(server_config(channel), router.clone());
        if let Err(e) = server.start().await {
            error!(channel = %channel.name, error = %e, "Channel server failed to start");
            stop_all(&servers).await;
            return Err(e);
        }
        servers.push(server);
    }
    Ok(servers)
}

async fn stop_all(servers: &[ConnectionServer]) {
    join_all(servers.iter().map(|server| server.stop())).await;
}

fn server_config(channel: &ChannelConfig) -> ServerConfig {
    ServerConfig::new(Channel::new(channel.name.as_str()), channel.bind_addr.as_str())
        .with_push(channel.push)
}
