//! double-signals - Multi-Room Double Game Signal Bot

use anyhow::Result;

use double_signals::adapters::cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (bot tokens go here, not in config.toml)
    dotenvy::dotenv().ok();

    let app = cli::init();
    cli::execute(app).await
}
