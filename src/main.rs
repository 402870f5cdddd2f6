#[tokio::main]
async fn main() -> anyhow::Result<()> {
    quietcare::run().await
}
