use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use trendbot::broker::bybit::BybitClient;
use trendbot::config::{TradingBotConfig, DEFAULT_CONFIG_PATH};
use trendbot::predict::{PredictClient, PredictService};
use trendbot::strategy::TrendStrategy;
use trendbot::trading::TradingBot;

#[derive(Parser, Debug)]
#[command(name = "trendbot", about = "Live trading core for a trend-following futures bot")]
struct Cli {
    /// Path to the bot configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Prediction service address (host:port)
    #[arg(long, default_value = "127.0.0.1:8000")]
    predictor: String,

    /// Log level filter
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    trendbot::telemetry::init_logging(&cli.log_level)?;

    let config = TradingBotConfig::load(&cli.config)?;

    let client = Arc::new(PredictClient::new(&cli.predictor));
    wait_for_predictor(&client).await?;
    let service: Arc<dyn PredictService> = client;

    let broker = Arc::new(BybitClient::from_env()?.category("linear"));

    let ctx = CancellationToken::new();
    let bot = TradingBot::new(ctx.clone(), broker);

    let mut ids = Vec::with_capacity(config.strategies.len());
    for strategy_cfg in &config.strategies {
        let strategy = TrendStrategy::new(strategy_cfg, service.clone())?;
        ids.push(bot.add_strategy(Box::new(strategy)).await);
    }
    for id in &ids {
        if let Err(e) = bot.launch_strategy(id).await {
            tracing::error!(id = %id, error = %e, "strategy launch failed");
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    ctx.cancel();
    bot.stop().await;
    // Give in-flight order tasks a moment to settle.
    tokio::time::sleep(Duration::from_secs(1)).await;

    Ok(())
}

async fn wait_for_predictor(client: &PredictClient) -> anyhow::Result<()> {
    for _ in 0..30 {
        if client.ping().await {
            tracing::info!("prediction service is up");
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    anyhow::bail!("prediction service did not answer /ping")
}
