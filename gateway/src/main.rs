mod appliance;
mod dns_server;
mod host;
mod portal;
mod provisioning;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
