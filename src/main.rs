//! Binary entry point: parses the config path, initializes tracing, and
//! hands off to [`roomline_gateway::run`].

use roomline_gateway::config::Config;
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = roomline_gateway::resolve_config_path();
    let mut config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(roomline_gateway::error::ConfigError::Io(_)) => {
            eprintln!("no config file at {}, using defaults", config_path);
            toml::from_str("").expect("empty config parses to defaults")
        }
        Err(err) => {
            eprintln!("ERROR: failed to parse config from {}: {}", config_path, err);
            std::process::exit(1);
        }
    };
    config.apply_cli_overrides(std::env::args().skip(1));

    roomline_gateway::init_tracing(config.gateway.debug);

    if let Err(err) = roomline_gateway::run(config).await {
        error!(%err, "gateway exited with error");
        std::process::exit(1);
    }
    Ok(())
}
