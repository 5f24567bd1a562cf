mod auth_commands;

use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    meshrelay_config::RelayConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "meshrelay", about = "meshrelay: authenticated real-time message relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML, YAML or JSON). Discovered automatically when unset.
    #[arg(long, global = true, env = "MESHRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server.
    Serve {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,
        /// Overrides `database.url`.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
    /// Bearer token utilities.
    Auth {
        #[command(subcommand)]
        action: auth_commands::AuthAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load and validate the effective config.
    Check,
    /// Print the path of the config file that would be loaded.
    Path,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Apply command-line overrides on top of the loaded config.
fn apply_overrides(
    mut config: RelayConfig,
    bind: Option<String>,
    port: Option<u16>,
    database_url: Option<String>,
) -> RelayConfig {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(url) = database_url {
        config.database.url = url;
    }
    config
}

fn load(explicit: Option<&Path>) -> anyhow::Result<RelayConfig> {
    meshrelay_config::discover_and_load(explicit).context("failed to load config")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "meshrelay starting");

    let explicit = cli.config.as_deref();
    match cli.command {
        Commands::Serve {
            bind,
            port,
            database_url,
        } => {
            let config = apply_overrides(load(explicit)?, bind, port, database_url);
            config.validate()?;
            meshrelay_gateway::start_gateway(config).await
        },
        Commands::Auth { action } => auth_commands::handle_auth(action, &load(explicit)?),
        Commands::Config { action } => match action {
            ConfigAction::Check => {
                let config = load(explicit)?;
                println!(
                    "config ok: {}:{} database={}",
                    config.server.bind, config.server.port, config.database.url
                );
                Ok(())
            },
            ConfigAction::Path => {
                match explicit
                    .map(Path::to_path_buf)
                    .or_else(meshrelay_config::find_config_file)
                {
                    Some(path) => println!("{}", path.display()),
                    None => println!("no config file found, using defaults"),
                }
                Ok(())
            },
        },
    }
}
