use article_word_count::{config::Config, fetcher::ReqwestTransport, runner};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Logs go to stderr so stdout only carries the summary
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Processing started and is going to take some time, please don't exit");
    let summary = runner::run(&config, Arc::new(ReqwestTransport)).await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
