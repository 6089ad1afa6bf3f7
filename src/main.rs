#[tokio::main]
async fn main() -> anyhow::Result<()> {
    clipcast_lib::run().await
}
