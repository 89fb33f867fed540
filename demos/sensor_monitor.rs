use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};
use pulsewatch::{
    AuthorizationState, BleHealthService, HeartRateError, HeartRateProvider, Result, ScanParams,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("❤️ Pulsewatch Sensor Monitor Example");
    info!("Searching for Bluetooth heart rate sensors...");

    let params = ScanParams {
        scan_timeout_ms: 5_000,
        device_name: std::env::args().nth(1),
        ..Default::default()
    };
    let service = Arc::new(BleHealthService::with_params(params).await?);
    let provider = HeartRateProvider::live(service.clone());

    match provider.request_authorization().await {
        AuthorizationState::Granted => {
            let name = service.sensor_name().await.unwrap_or_default();
            info!("✅ Connected to: {}", name);
        }
        other => {
            error!("❌ Authorization not granted: {}", other);
            return other.into_result();
        }
    }

    let handle = provider
        .subscribe(
            |reading| println!("❤️  {reading}"),
            |e| match e {
                HeartRateError::NoData => info!("Waiting for heart rate..."),
                e => warn!("Failed to get live updates: {}", e),
            },
        )
        .await?;

    info!("Press Ctrl+C to stop monitoring");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("🛑 Interrupted"),
        () = tokio::time::sleep(Duration::from_secs(300)) => info!("⏱️ Monitoring window elapsed"),
    }

    provider.cancel(handle).await;
    service.disconnect().await?;

    Ok(())
}
