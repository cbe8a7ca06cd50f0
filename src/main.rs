use anyhow::Context;
use cmdgate::{config::GatewayConfig, init_gateway, init_tracing};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/cmdgate.yaml".to_string());

    let config = GatewayConfig::from_file(&config_path).with_context(|| {
        format!(
            "failed to load configuration from {} (usage: cmdgate [config_file])",
            config_path
        )
    })?;

    init_gateway(config).await.context("gateway error")?;

    Ok(())
}
