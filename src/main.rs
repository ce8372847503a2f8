#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rendition_server::run().await
}
