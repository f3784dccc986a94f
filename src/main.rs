use callsync_lib::{logger, Config, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "callsync", version, about = "Anonymous one-to-one video call client")]
struct Cli {
    /// Путь к TOML конфигурации
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Адрес сигнального реле (ws:// или wss://)
    #[arg(long)]
    signaling_url: Option<String>,

    /// HTTP эндпоинт с TURN конфигурацией
    #[arg(long)]
    turn_config_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(url) = cli.signaling_url {
        config.signaling_url = url;
    }
    if let Some(url) = cli.turn_config_url {
        config.turn_config_url = Some(url);
    }

    logger::init(config.log_filter());
    callsync_lib::run(config).await
}
