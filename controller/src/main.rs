mod host;
mod trigger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
