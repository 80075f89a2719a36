use std::{path::PathBuf, sync::Arc};

use {
    clap::Parser,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    switchboard_channels::WorkerFactories,
    switchboard_config::{StoreBackend, SwitchboardConfig},
    switchboard_telnet::TelnetFactory,
};

#[derive(Parser)]
#[command(name = "switchboard", about = "Switchboard, a control plane for channel workers")]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, env = "SWITCHBOARD_BIND")]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, env = "SWITCHBOARD_PORT")]
    port: Option<u16>,
    /// Config file to load instead of searching the standard locations.
    #[arg(long, env = "SWITCHBOARD_CONFIG")]
    config: Option<PathBuf>,
    /// Keep channels in memory only (overrides `store.backend`).
    #[arg(long, default_value_t = false)]
    in_memory: bool,
    /// SQLite database URL (overrides `store.database_url`).
    #[arg(long, env = "SWITCHBOARD_DATABASE_URL")]
    database_url: Option<String>,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SwitchboardConfig> {
    let mut config = match &cli.config {
        Some(path) => switchboard_config::load_config(path)?,
        None => switchboard_config::discover_and_load(),
    };

    // CLI args override config values
    if let Some(bind) = &cli.bind {
        config.server.bind.clone_from(bind);
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.in_memory {
        config.store.backend = StoreBackend::Memory;
    }
    if let Some(url) = &cli.database_url {
        config.store.database_url = Some(url.clone());
    }
    Ok(config)
}

/// Every channel type this binary can run.
fn worker_factories() -> WorkerFactories {
    WorkerFactories::new().with(Arc::new(TelnetFactory::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "switchboard starting");

    let config = load_config(&cli)?;
    switchboard_gateway::start_gateway(&config, worker_factories()).await
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::io::Write};

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[server]\nbind = \"0.0.0.0\"\nport = 9000").unwrap();

        let cli = Cli::parse_from([
            "switchboard",
            "--config",
            file.path().to_str().unwrap(),
            "--port",
            "9100",
            "--in-memory",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli::parse_from(["switchboard", "--config", "/nonexistent/switchboard.toml"]);
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn telnet_is_registered() {
        assert!(worker_factories().get("telnet").is_some());
    }
}
