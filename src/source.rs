use futures::StreamExt;
use rand::Rng;
use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    error::{HeartRateError, Result},
    platform::HealthService,
    subscription::DeliveryGate,
    types::{AccessRequest, AuthorizationState, ProviderConfig, ProviderMode, Reading, SampleType},
};

/// Acquisition strategy, fixed when the provider is built
pub(crate) enum Source {
    Mock(MockSource),
    Live(LiveSource),
}

impl Source {
    pub(crate) const fn mode(&self) -> ProviderMode {
        match self {
            Self::Mock(_) => ProviderMode::Mock,
            Self::Live(_) => ProviderMode::Live,
        }
    }

    pub(crate) async fn authorize(&self) -> AuthorizationState {
        match self {
            Self::Mock(_) => AuthorizationState::Granted,
            Self::Live(live) => live.authorize().await,
        }
    }

    pub(crate) async fn fetch(&self) -> Result<Reading> {
        match self {
            Self::Mock(mock) => Ok(mock.generate()),
            Self::Live(live) => live.fetch().await,
        }
    }

    pub(crate) async fn start(&self, gate: Arc<DeliveryGate>) -> Result<JoinHandle<()>> {
        match self {
            Self::Mock(mock) => Ok(mock.start(gate)),
            Self::Live(live) => live.start(gate).await,
        }
    }
}

/// Uniform random readings on a fixed cadence
#[derive(Debug, Clone, Copy)]
pub(crate) struct MockSource {
    min_bpm: f64,
    max_bpm: f64,
    interval: Duration,
}

impl MockSource {
    pub(crate) const fn from_config(config: &ProviderConfig) -> Self {
        Self {
            min_bpm: config.mock_min_bpm,
            max_bpm: config.mock_max_bpm,
            interval: Duration::from_millis(config.mock_interval_ms),
        }
    }

    pub(crate) fn generate(&self) -> Reading {
        Reading::new(self.sample_bpm())
    }

    fn sample_bpm(&self) -> f64 {
        rand::thread_rng().gen_range(self.min_bpm..=self.max_bpm)
    }

    /// First tick fires one interval after the call
    fn start(self, gate: Arc<DeliveryGate>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + self.interval, self.interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = SystemTime::UNIX_EPOCH;

            loop {
                ticks.tick().await;

                // Wall clock may step backwards; generated readings must not.
                let timestamp = SystemTime::now().max(last);
                last = timestamp;

                if !gate.reading(Reading::at(self.sample_bpm(), timestamp)).await {
                    break;
                }
            }

            debug!("Mock heart rate generator stopped");
        })
    }
}

/// Readings relayed from a platform health service
#[derive(Clone)]
pub(crate) struct LiveSource {
    service: Arc<dyn HealthService>,
}

impl LiveSource {
    pub(crate) fn new(service: Arc<dyn HealthService>) -> Self {
        Self { service }
    }

    async fn authorize(&self) -> AuthorizationState {
        if !self.service.supports(SampleType::HeartRate) {
            warn!("Platform does not provide heart rate samples");
            return AuthorizationState::Error("heart rate type not available".to_string());
        }

        match self
            .service
            .request_permission(&AccessRequest::heart_rate_read())
            .await
        {
            Ok(true) => AuthorizationState::Granted,
            Ok(false) => AuthorizationState::Denied,
            Err(e) => AuthorizationState::Error(e.to_string()),
        }
    }

    async fn fetch(&self) -> Result<Reading> {
        if !self.service.supports(SampleType::HeartRate) {
            return Err(HeartRateError::TypeUnavailable(SampleType::HeartRate));
        }

        self.service
            .query_most_recent_sample(SampleType::HeartRate)
            .await?
            .map(Reading::from)
            .ok_or(HeartRateError::NoData)
    }

    async fn start(&self, gate: Arc<DeliveryGate>) -> Result<JoinHandle<()>> {
        if !self.service.supports(SampleType::HeartRate) {
            return Err(HeartRateError::TypeUnavailable(SampleType::HeartRate));
        }

        let mut changes = self.service.observe(SampleType::HeartRate).await?;
        let source = self.clone();

        Ok(tokio::spawn(async move {
            while let Some(change) = changes.next().await {
                let delivered = match change {
                    Ok(()) => match source.fetch().await {
                        Ok(reading) => gate.reading(reading).await,
                        Err(e) => gate.error(e).await,
                    },
                    Err(e) => gate.error(e).await,
                };

                if !delivered {
                    debug!("Live heart rate relay stopped");
                    return;
                }
            }

            info!("Heart rate observation ended");
            gate.error(HeartRateError::Platform(
                "heart rate observation ended".to_string(),
            ))
            .await;
            gate.close_now();
        }))
    }
}
