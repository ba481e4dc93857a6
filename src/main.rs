use anyhow::Result;
use mavkus::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
