mod controller;
mod host;
mod platform;
mod store;
mod ticker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
