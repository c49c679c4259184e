//! Board server command: `shopflow serve`.

use anyhow::Result;

use shopflow::config::ShopConfig;

pub async fn cmd_serve(
    mut config: ShopConfig,
    host: Option<String>,
    port: Option<u16>,
    dev: bool,
) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if dev {
        config.server.dev_mode = true;
    }

    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    shopflow::board::server::start_server(config).await
}
