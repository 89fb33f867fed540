use async_trait::async_trait;
use btleplug::{
    api::{
        Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        ValueNotification,
    },
    platform::{Manager, Peripheral},
};
use futures::stream::{Stream, StreamExt};
use std::{pin::Pin, sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, Mutex, RwLock},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{HeartRateError, Result},
    platform::{change_stream, ChangeStream, HealthService, CHANGE_CHANNEL_CAPACITY},
    protocol::parse_heart_rate_measurement,
    types::{AccessRequest, Sample, SampleType, ScanParams},
    HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
};

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// Health service backed by a Bluetooth LE heart rate sensor
///
/// Talks to any sensor exposing the standard GATT Heart Rate Service (chest
/// straps, watches in broadcast mode, arm bands). Granting permission means
/// finding a sensor, connecting, and subscribing to Heart Rate Measurement
/// notifications. From then on every usable measurement becomes the most recent
/// sample and wakes observers.
///
/// Only reading heart rate is possible; requests for write access are refused.
pub struct BleHealthService {
    manager: Manager,
    params: ScanParams,
    link: Mutex<Option<SensorLink>>,
    latest: Arc<RwLock<Option<Sample>>>,
}

/// An established sensor connection
struct SensorLink {
    peripheral: Peripheral,
    name: String,
    /// Kept only to hand out fresh receivers; the relay task owns the sender
    changes: broadcast::Receiver<()>,
    relay: JoinHandle<()>,
}

impl BleHealthService {
    /// Create a service with default scan parameters
    ///
    /// # Errors
    ///
    /// Returns [`HeartRateError::Ble`] if the Bluetooth stack cannot be initialized.
    pub async fn new() -> Result<Self> {
        Self::with_params(ScanParams::default()).await
    }

    /// Create a service with custom scan parameters
    ///
    /// # Errors
    ///
    /// Returns [`HeartRateError::Ble`] if the Bluetooth stack cannot be initialized.
    pub async fn with_params(params: ScanParams) -> Result<Self> {
        let manager = Manager::new().await?;

        Ok(Self {
            manager,
            params,
            link: Mutex::new(None),
            latest: Arc::new(RwLock::new(None)),
        })
    }

    /// Name of the connected sensor
    pub async fn sensor_name(&self) -> Option<String> {
        self.link.lock().await.as_ref().map(|link| link.name.clone())
    }

    /// Check if the sensor is still connected
    pub async fn is_connected(&self) -> bool {
        match self.link.lock().await.as_ref() {
            Some(link) => link.peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    /// Disconnect from the sensor
    ///
    /// Observation streams end once the relay task stops.
    ///
    /// # Errors
    ///
    /// Returns [`HeartRateError::Ble`] if disconnection fails.
    pub async fn disconnect(&self) -> Result<()> {
        let link = self.link.lock().await.take();
        if let Some(link) = link {
            link.relay.abort();
            link.peripheral.disconnect().await?;
            info!("Disconnected from {}", link.name);
        }
        Ok(())
    }

    /// Scan for heart rate sensors and pick the strongest matching one
    async fn find_sensor(&self) -> Result<Option<(Peripheral, String)>> {
        info!("Scanning for heart rate sensors...");

        let adapters = self.manager.adapters().await?;
        let central = adapters
            .into_iter()
            .next()
            .ok_or_else(|| HeartRateError::Platform("No Bluetooth adapters found".to_string()))?;

        central
            .start_scan(ScanFilter {
                services: vec![HEART_RATE_SERVICE_UUID],
            })
            .await?;
        tokio::time::sleep(Duration::from_millis(self.params.scan_timeout_ms)).await;
        central.stop_scan().await?;

        let mut candidates = Vec::new();
        for peripheral in central.peripherals().await? {
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };

            let name = properties
                .local_name
                .unwrap_or_else(|| "Unknown sensor".to_string());

            if !is_candidate(&self.params, &name, &properties.services) {
                continue;
            }

            debug!("Found heart rate sensor candidate: {}", name);
            candidates.push((peripheral, name, properties.rssi.unwrap_or(i16::MIN)));
        }

        info!("Scan completed. Found {} sensor(s)", candidates.len());

        candidates.sort_by(|a, b| b.2.cmp(&a.2));
        Ok(candidates
            .into_iter()
            .next()
            .map(|(peripheral, name, _)| (peripheral, name)))
    }

    /// Connect, subscribe to measurements, and start relaying them
    async fn connect_sensor(&self, peripheral: Peripheral, name: String) -> Result<SensorLink> {
        info!("Connecting to sensor: {}", name);

        if !peripheral.is_connected().await? {
            let timeout_ms = self.params.connect_timeout_ms;
            timeout(Duration::from_millis(timeout_ms), peripheral.connect())
                .await
                .map_err(|_| HeartRateError::Timeout { timeout_ms })?
                .map_err(|e| HeartRateError::Platform(format!("Failed to connect: {e}")))?;
        }

        peripheral.discover_services().await?;

        let measurement = find_measurement_characteristic(&peripheral)
            .ok_or(HeartRateError::TypeUnavailable(SampleType::HeartRate))?;

        let notifications = peripheral.notifications().await?;
        peripheral.subscribe(&measurement).await?;

        let (sender, receiver) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let relay = tokio::spawn(relay_measurements(
            notifications,
            self.latest.clone(),
            sender,
        ));

        info!("Subscribed to heart rate measurements from {}", name);

        Ok(SensorLink {
            peripheral,
            name,
            changes: receiver,
            relay,
        })
    }
}

/// A sensor must advertise the Heart Rate Service and match the wanted name, if any
fn is_candidate(params: &ScanParams, name: &str, services: &[Uuid]) -> bool {
    services.contains(&HEART_RATE_SERVICE_UUID)
        && params
            .device_name
            .as_deref()
            .is_none_or(|wanted| name.contains(wanted))
}

fn find_measurement_characteristic(peripheral: &Peripheral) -> Option<Characteristic> {
    peripheral.characteristics().into_iter().find(|c| {
        c.uuid == HEART_RATE_MEASUREMENT_UUID && c.properties.contains(CharPropFlags::NOTIFY)
    })
}

/// Decode measurement notifications into the latest sample until the stream ends
async fn relay_measurements(
    mut notifications: NotificationStream,
    latest: Arc<RwLock<Option<Sample>>>,
    changes: broadcast::Sender<()>,
) {
    while let Some(notification) = notifications.next().await {
        if notification.uuid != HEART_RATE_MEASUREMENT_UUID {
            continue;
        }

        match parse_heart_rate_measurement(&notification.value) {
            Ok(measurement) if measurement.is_usable() => {
                *latest.write().await = Some(Sample::now(f64::from(measurement.bpm)));
                let _ = changes.send(());
            }
            Ok(measurement) => {
                debug!(
                    "Skipping measurement without skin contact ({} BPM)",
                    measurement.bpm
                );
            }
            Err(e) => warn!("Discarding heart rate measurement: {}", e),
        }
    }

    info!("Heart rate sensor notifications ended");
}

#[async_trait]
impl HealthService for BleHealthService {
    async fn request_permission(&self, request: &AccessRequest) -> Result<bool> {
        if !request.write.is_empty() {
            warn!("Bluetooth heart rate sensors cannot accept writes: {:?}", request.write);
            return Ok(false);
        }

        if let Some(unsupported) = request.read.iter().find(|t| !self.supports(**t)) {
            return Err(HeartRateError::TypeUnavailable(*unsupported));
        }

        let mut link = self.link.lock().await;
        if let Some(existing) = link.as_ref() {
            if existing.peripheral.is_connected().await.unwrap_or(false) {
                return Ok(true);
            }
            existing.relay.abort();
        }

        let Some((peripheral, name)) = self.find_sensor().await? else {
            return Err(HeartRateError::Platform(
                "No heart rate sensor found".to_string(),
            ));
        };

        *link = Some(self.connect_sensor(peripheral, name).await?);
        Ok(true)
    }

    async fn query_most_recent_sample(&self, sample_type: SampleType) -> Result<Option<Sample>> {
        if !self.supports(sample_type) {
            return Err(HeartRateError::TypeUnavailable(sample_type));
        }
        Ok(*self.latest.read().await)
    }

    async fn observe(&self, sample_type: SampleType) -> Result<ChangeStream> {
        if !self.supports(sample_type) {
            return Err(HeartRateError::TypeUnavailable(sample_type));
        }

        match self.link.lock().await.as_ref() {
            Some(link) => Ok(change_stream(link.changes.resubscribe())),
            None => Err(HeartRateError::Platform(
                "Not connected to a heart rate sensor".to_string(),
            )),
        }
    }

    fn supports(&self, sample_type: SampleType) -> bool {
        sample_type == SampleType::HeartRate
    }
}

impl Drop for BleHealthService {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.relay.abort();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = link.peripheral.disconnect().await;
                });
            }
        }
    }
}
