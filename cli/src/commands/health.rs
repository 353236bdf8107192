use anyhow::{bail, Result};
use stoat_core::HealthStatus;
use stoat_networking::StoatClient;

pub async fn run(client: &StoatClient) -> Result<()> {
    match client.health().await {
        HealthStatus::Healthy => println!("healthy"),
        HealthStatus::Degraded => println!("degraded"),
        HealthStatus::Unhealthy => bail!("backend at {} is unhealthy", client.base_url()),
    }
    Ok(())
}
