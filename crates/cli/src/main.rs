use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "murmur")]
#[command(about = "murmur: relay Signal messages to Ollama personalities over MQTT", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config and bundled personality prompts).
    Init {
        /// Config file path (default: MURMUR_CONFIG_PATH or ~/.murmur/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the client-side bridge: poll signal-cli, publish requests, send replies back.
    Bridge {
        /// Config file path (default: MURMUR_CONFIG_PATH or ~/.murmur/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the server side: answer requests for the configured personalities with Ollama.
    Personality {
        /// Config file path (default: MURMUR_CONFIG_PATH or ~/.murmur/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Serve only this personality (default: all configured personalities).
        #[arg(long, short, value_name = "NAME")]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("failed to load .env: {}", e);
        }
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("murmur {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Bridge { config }) => {
            if let Err(e) = run_bridge(config).await {
                log::error!("bridge failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Personality { config, name }) => {
            if let Err(e) = run_personality(config, name).await {
                log::error!("personality server failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_bridge(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = lib::config::load_config(config_path)?;
    log::info!("using config {}", path.display());
    lib::bridge::run_bridge(config).await
}

async fn run_personality(
    config_path: Option<std::path::PathBuf>,
    name: Option<String>,
) -> anyhow::Result<()> {
    let (config, path) = lib::config::load_config(config_path)?;
    log::info!("using config {}", path.display());
    lib::server::run_personality_server(config, &path, name.as_deref()).await
}
