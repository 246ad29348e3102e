use notion_migrate::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}
