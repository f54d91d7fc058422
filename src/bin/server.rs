//! Elevator Server Binary
//!
//! Loads the configuration and the database catalogue, then serves the
//! endpoint until SIGINT or SIGTERM.

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use elevator::{Config, DatabaseRegistry, Server};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing_subscriber::{fmt, EnvFilter};

/// Elevator Server
#[derive(Parser, Debug)]
#[command(name = "elevator-server")]
#[command(about = "Multi-tenant key-value server")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen endpoint (overrides core.endpoint)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Log level (overrides core.log_level)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Root directory for databases; the catalogue moves to {root}/store
    #[arg(short, long)]
    data_root: Option<PathBuf>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_default_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_default_config {
        match Config::default().to_toml() {
            Ok(toml) => print!("{}", toml),
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Elevator Server v{}", elevator::VERSION);
    tracing::info!("Catalogue: {}", config.core.store_path.display());
    tracing::info!("Data root: {}", config.core.data_root.display());

    if config.core.daemonize {
        tracing::warn!("core.daemonize is set; running in the foreground");
    }

    if let Some(pidfile) = &config.core.pidfile {
        if let Err(e) = fs::write(pidfile, format!("{}\n", std::process::id())) {
            tracing::error!("Failed to write pid file {}: {}", pidfile.display(), e);
            std::process::exit(1);
        }
    }

    let code = match serve(&config) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("Server error: {}", e);
            1
        }
    };

    if let Some(pidfile) = &config.core.pidfile {
        if let Err(e) = fs::remove_file(pidfile) {
            tracing::warn!("Failed to remove pidfile {}: {}", pidfile.display(), e);
        }
    }

    tracing::info!("Server stopped");
    std::process::exit(code);
}

/// Config file (or defaults), then command-line overrides
fn load_config(args: &Args) -> elevator::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(endpoint) = &args.endpoint {
        config.core.endpoint = endpoint.clone();
    }
    if let Some(level) = &args.log_level {
        config.core.log_level = level.clone();
    }
    if let Some(root) = &args.data_root {
        config.core.store_path = root.join("store");
        config.core.data_root = root.clone();
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(config: &Config) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.core.log_level.to_lowercase()));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true);

    match &config.core.log_file {
        Some(path) => {
            let file = File::options().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}

fn serve(config: &Config) -> elevator::Result<()> {
    let registry = Arc::new(DatabaseRegistry::from_config(config)?);
    tracing::info!("Loaded {} database(s)", registry.len());

    if config.core.auto_create_default_db && registry.ensure_default(&config.core.default_db)? {
        tracing::info!("Created default database {}", config.core.default_db);
    }

    let server = Server::bind(config, registry)?;

    let shutdown = server.shutdown_flag();
    signal_hook::flag::register(SIGINT, Arc::clone(&shutdown))?;
    signal_hook::flag::register(SIGTERM, shutdown)?;

    server.run()
}
