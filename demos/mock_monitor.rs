use std::time::Duration;
use tracing::{error, info, warn};
use pulsewatch::{AuthorizationState, HeartRateProvider, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("❤️ Pulsewatch Mock Monitor Example");

    let provider = HeartRateProvider::mock();

    match provider.request_authorization().await {
        AuthorizationState::Granted => info!("✅ Authorization granted"),
        other => {
            error!("❌ Authorization not granted: {}", other);
            return other.into_result();
        }
    }

    let reading = provider.fetch_once().await?;
    info!("📊 Current heart rate: {}", reading);

    let handle = provider
        .subscribe(
            |reading| println!("❤️  {reading}"),
            |e| warn!("Failed to get live updates: {}", e),
        )
        .await?;

    info!("Streaming for 10 seconds...");
    tokio::time::sleep(Duration::from_secs(10)).await;

    provider.cancel(handle).await;
    info!("🛑 Stopped");

    Ok(())
}
