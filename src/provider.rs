use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::{
    error::{HeartRateError, Result},
    platform::HealthService,
    source::{LiveSource, MockSource, Source},
    subscription::{DeliveryGate, SubscriptionHandle},
    types::{AuthorizationState, ProviderConfig, ProviderMode, ProviderState, Reading},
};

/// Heart rate data provider
///
/// `HeartRateProvider` hides where heart rate numbers come from. In mock mode it
/// fabricates uniformly distributed readings; in live mode it relays samples
/// from a [`HealthService`]. Both paths share one interface:
///
/// 1. [`request_authorization`](Self::request_authorization) once at start-up
/// 2. [`fetch_once`](Self::fetch_once) for the latest value, or
///    [`subscribe`](Self::subscribe) for continuous delivery
/// 3. [`cancel`](Self::cancel) to stop delivery
///
/// Data operations fail with [`HeartRateError::NotAuthorized`] until
/// authorization resolves to [`AuthorizationState::Granted`]. Errors never
/// poison the provider; the caller may retry any call. The provider performs no
/// retries of its own.
///
/// Callbacks run on a tokio task. Moving values onto a UI thread is up to the
/// caller.
///
/// # Examples
///
/// ```no_run
/// use pulsewatch::HeartRateProvider;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let provider = HeartRateProvider::mock();
///     provider.request_authorization().await.into_result()?;
///
///     let reading = provider.fetch_once().await?;
///     println!("Heart rate: {reading}");
///
///     let handle = provider
///         .subscribe(|reading| println!("{reading}"), |e| eprintln!("{e}"))
///         .await?;
///     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
///     provider.cancel(handle).await;
///
///     Ok(())
/// }
/// ```
pub struct HeartRateProvider {
    source: Source,
    config: ProviderConfig,
    state: RwLock<ProviderState>,
    /// Held for the whole platform round trip so requests never overlap
    authorizing: Mutex<()>,
    active: Mutex<Option<(u64, Arc<DeliveryGate>)>>,
}

impl HeartRateProvider {
    /// Mock provider with default settings (60–100 BPM every second)
    #[must_use]
    pub fn mock() -> Self {
        Self::build(
            Source::Mock(MockSource::from_config(&ProviderConfig::default())),
            ProviderConfig::default(),
        )
    }

    /// Live provider backed by `service`
    #[must_use]
    pub fn live(service: Arc<dyn HealthService>) -> Self {
        let config = ProviderConfig::with_mode(ProviderMode::Live);
        Self::build(Source::Live(LiveSource::new(service)), config)
    }

    /// Build a provider from configuration
    ///
    /// The mode flag picks the acquisition strategy. In mock mode `service` is
    /// ignored and never called.
    ///
    /// # Errors
    ///
    /// Returns [`HeartRateError::InvalidConfiguration`] if the configuration is
    /// invalid or live mode is requested without a service.
    pub fn from_config(
        config: ProviderConfig,
        service: Option<Arc<dyn HealthService>>,
    ) -> Result<Self> {
        config.validate()?;

        let source = match config.mode {
            ProviderMode::Mock => {
                if service.is_some() {
                    debug!("Mock mode selected - health service will not be used");
                }
                Source::Mock(MockSource::from_config(&config))
            }
            ProviderMode::Live => {
                let service = service.ok_or_else(|| {
                    HeartRateError::InvalidConfiguration(
                        "live mode requires a health service".to_string(),
                    )
                })?;
                Source::Live(LiveSource::new(service))
            }
        };

        Ok(Self::build(source, config))
    }

    fn build(source: Source, config: ProviderConfig) -> Self {
        Self {
            source,
            config,
            state: RwLock::new(ProviderState::Uninitialized),
            authorizing: Mutex::new(()),
            active: Mutex::new(None),
        }
    }

    /// Acquisition strategy in use
    #[must_use]
    pub const fn mode(&self) -> ProviderMode {
        self.source.mode()
    }

    /// Configuration the provider was built with
    #[must_use]
    pub const fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Current authorization lifecycle state
    pub async fn state(&self) -> ProviderState {
        self.state.read().await.clone()
    }

    /// Check if authorization resolved to granted
    pub async fn is_authorized(&self) -> bool {
        self.state.read().await.is_authorized()
    }

    /// Request access to heart rate data
    ///
    /// Mock mode resolves immediately with [`AuthorizationState::Granted`]. Live
    /// mode asks the health service for read access to heart rate samples and
    /// waits for its answer; a platform that never answers leaves this call
    /// pending. Once granted, further calls return `Granted` without asking
    /// again. After a denial or error the caller may call this again to retry.
    ///
    /// Concurrent calls are serialized: a call made while another is waiting on
    /// the platform waits for that outcome, and skips the platform if it was
    /// `Granted`.
    pub async fn request_authorization(&self) -> AuthorizationState {
        let _authorizing = self.authorizing.lock().await;
        {
            let mut state = self.state.write().await;
            if state.is_authorized() {
                return AuthorizationState::Granted;
            }
            *state = ProviderState::AuthorizationPending;
        }

        info!("Requesting heart rate authorization ({} mode)", self.mode());
        let outcome = self.source.authorize().await;

        match &outcome {
            AuthorizationState::Granted => info!("Heart rate authorization granted"),
            AuthorizationState::Denied => warn!("Heart rate authorization denied"),
            AuthorizationState::Error(reason) => {
                warn!("Heart rate authorization failed: {}", reason);
            }
        }

        *self.state.write().await = ProviderState::Resolved(outcome.clone());
        outcome
    }

    /// Fetch the most recent reading
    ///
    /// # Errors
    ///
    /// Returns [`HeartRateError::NotAuthorized`] before authorization is granted,
    /// [`HeartRateError::NoData`] if the platform holds no sample,
    /// [`HeartRateError::TypeUnavailable`] if the platform lacks heart rate data,
    /// or the platform's own error.
    pub async fn fetch_once(&self) -> Result<Reading> {
        self.ensure_authorized().await?;
        self.source.fetch().await
    }

    /// Start continuous delivery
    ///
    /// Mock mode delivers a new reading every configured interval, the first one
    /// interval after this call. Live mode relays the latest sample (or the
    /// error fetching it) each time the platform signals a change; if the
    /// platform stops observing, `on_error` receives a final
    /// [`HeartRateError::Platform`] and the subscription ends.
    ///
    /// # Errors
    ///
    /// Returns [`HeartRateError::NotAuthorized`] before authorization is granted,
    /// [`HeartRateError::SubscriptionActive`] while another subscription is
    /// running, or the platform's error if observation cannot start.
    pub async fn subscribe<R, E>(&self, on_reading: R, on_error: E) -> Result<SubscriptionHandle>
    where
        R: Fn(Reading) + Send + Sync + 'static,
        E: Fn(HeartRateError) + Send + Sync + 'static,
    {
        self.ensure_authorized().await?;

        let mut active = self.active.lock().await;
        if let Some((id, gate)) = active.as_ref() {
            if !gate.is_closed() {
                debug!("Subscription {} still active", id);
                return Err(HeartRateError::SubscriptionActive);
            }
        }

        let gate = DeliveryGate::new(on_reading, on_error);
        let task = self.source.start(gate.clone()).await?;
        let handle = SubscriptionHandle::new(gate, task);

        info!(
            "Heart rate subscription {} started ({} mode)",
            handle.id(),
            self.mode()
        );
        *active = Some((handle.id(), handle.gate().clone()));

        Ok(handle)
    }

    /// Stop a subscription
    ///
    /// When this returns no further callback of `handle` runs.
    pub async fn cancel(&self, handle: SubscriptionHandle) {
        let id = handle.id();
        handle.cancel().await;

        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|(active_id, _)| *active_id == id) {
            *active = None;
        }

        info!("Heart rate subscription {} stopped", id);
    }

    /// Whether a subscription is currently delivering
    pub async fn has_active_subscription(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|(_, gate)| !gate.is_closed())
    }

    async fn ensure_authorized(&self) -> Result<()> {
        if self.state.read().await.is_authorized() {
            Ok(())
        } else {
            Err(HeartRateError::NotAuthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        platform::{InMemoryHealthService, PermissionResponse},
        types::{AccessRequest, SampleType},
    };
    use std::{sync::atomic::Ordering, time::Duration};
    use tokio::sync::mpsc;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    fn channel_callbacks() -> (
        impl Fn(Reading) + Send + Sync + 'static,
        impl Fn(HeartRateError) + Send + Sync + 'static,
        mpsc::UnboundedReceiver<(Instant, Reading)>,
        mpsc::UnboundedReceiver<HeartRateError>,
    ) {
        let (reading_tx, reading_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        (
            move |reading| {
                let _ = reading_tx.send((Instant::now(), reading));
            },
            move |error| {
                let _ = error_tx.send(error);
            },
            reading_rx,
            error_rx,
        )
    }

    async fn authorized_mock() -> HeartRateProvider {
        let provider = HeartRateProvider::mock();
        assert_eq!(
            provider.request_authorization().await,
            AuthorizationState::Granted
        );
        provider
    }

    #[tokio::test]
    async fn test_initial_state() {
        let provider = HeartRateProvider::mock();
        assert_eq!(provider.state().await, ProviderState::Uninitialized);
        assert_eq!(provider.mode(), ProviderMode::Mock);
        assert!(!provider.is_authorized().await);
        assert!(!provider.has_active_subscription().await);
    }

    #[tokio::test]
    async fn test_mock_fetch_stays_in_range() {
        let provider = authorized_mock().await;

        for _ in 0..10_000 {
            let reading = assert_ok!(provider.fetch_once().await);
            assert!(
                (60.0..=100.0).contains(&reading.bpm()),
                "{} outside 60-100",
                reading.bpm()
            );
        }
    }

    #[tokio::test]
    async fn test_mock_authorization_never_touches_platform() {
        let service = Arc::new(InMemoryHealthService::denying());
        let platform: Arc<dyn HealthService> = service.clone();
        let provider = HeartRateProvider::from_config(ProviderConfig::default(), Some(platform))
            .unwrap();

        for _ in 0..3 {
            assert_eq!(
                provider.request_authorization().await,
                AuthorizationState::Granted
            );
        }
        assert_ok!(provider.fetch_once().await);
        assert_eq!(service.permission_requests(), 0);
        assert_eq!(service.queries(), 0);
    }

    #[tokio::test]
    async fn test_operations_before_authorization_fail() {
        let provider = HeartRateProvider::mock();

        let error = assert_err!(provider.fetch_once().await);
        assert!(matches!(error, HeartRateError::NotAuthorized));

        let error = assert_err!(provider.subscribe(|_| {}, |_| {}).await);
        assert!(matches!(error, HeartRateError::NotAuthorized));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_subscription_cadence() {
        let provider = authorized_mock().await;
        let (on_reading, on_error, mut readings, _errors) = channel_callbacks();

        let started = Instant::now();
        let handle = assert_ok!(provider.subscribe(on_reading, on_error).await);

        let mut previous = started;
        let mut last_timestamp = None;
        for _ in 0..5 {
            let (at, reading) = readings.recv().await.expect("reading delivered");
            let gap = at.duration_since(previous);
            assert!(gap >= Duration::from_millis(990), "gap {gap:?} too short");
            assert!(gap <= Duration::from_millis(1_100), "gap {gap:?} too long");
            assert!((60.0..=100.0).contains(&reading.bpm()));
            if let Some(last) = last_timestamp {
                assert!(reading.timestamp() >= last);
            }
            last_timestamp = Some(reading.timestamp());
            previous = at;
        }

        provider.cancel(handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_delivery_after_cancel() {
        let provider = authorized_mock().await;
        let (on_reading, on_error, mut readings, _errors) = channel_callbacks();

        let handle = assert_ok!(provider.subscribe(on_reading, on_error).await);
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        provider.cancel(handle).await;

        let mut delivered = 0;
        while readings.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 2);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(readings.try_recv().is_err());
        assert!(!provider.has_active_subscription().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_reading() {
        let provider = authorized_mock().await;
        let (on_reading, on_error, mut readings, _errors) = channel_callbacks();

        let handle = assert_ok!(provider.subscribe(on_reading, on_error).await);
        provider.cancel(handle).await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(readings.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_single_active_subscription() {
        let provider = authorized_mock().await;

        let first = assert_ok!(provider.subscribe(|_| {}, |_| {}).await);
        let error = assert_err!(provider.subscribe(|_| {}, |_| {}).await);
        assert!(matches!(error, HeartRateError::SubscriptionActive));

        provider.cancel(first).await;
        let second = assert_ok!(provider.subscribe(|_| {}, |_| {}).await);
        assert!(second.is_active());
        second.cancel().await;
        assert!(!provider.has_active_subscription().await);
    }

    #[tokio::test]
    async fn test_live_authorization_outcomes() {
        let service = Arc::new(InMemoryHealthService::denying());
        let provider = HeartRateProvider::live(service.clone());

        assert_eq!(
            provider.request_authorization().await,
            AuthorizationState::Denied
        );
        assert_eq!(
            provider.state().await,
            ProviderState::Resolved(AuthorizationState::Denied)
        );

        service
            .set_response(PermissionResponse::Fail("store offline".to_string()))
            .await;
        let outcome = provider.request_authorization().await;
        assert!(matches!(outcome, AuthorizationState::Error(reason) if reason.contains("store offline")));

        service.set_response(PermissionResponse::Grant).await;
        assert!(provider.request_authorization().await.is_granted());
        assert!(provider.request_authorization().await.is_granted());
        assert_eq!(service.permission_requests(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_authorization_asks_platform_once() {
        let service = Arc::new(InMemoryHealthService::new());
        let provider = HeartRateProvider::live(service.clone());

        let (first, second) = tokio::join!(
            provider.request_authorization(),
            provider.request_authorization()
        );

        assert!(first.is_granted());
        assert!(second.is_granted());
        assert_eq!(service.permission_requests(), 1);
        assert_eq!(
            provider.state().await,
            ProviderState::Resolved(AuthorizationState::Granted)
        );
    }

    #[tokio::test]
    async fn test_live_requests_read_only_access() {
        let service = Arc::new(InMemoryHealthService::new());
        let provider = HeartRateProvider::live(service.clone());
        provider.request_authorization().await;

        assert_eq!(
            service.last_request().await,
            Some(AccessRequest::heart_rate_read())
        );
    }

    #[tokio::test]
    async fn test_live_without_heart_rate_type() {
        let service = Arc::new(InMemoryHealthService::without_heart_rate());
        let provider = HeartRateProvider::live(service.clone());

        let outcome = provider.request_authorization().await;
        assert!(matches!(outcome, AuthorizationState::Error(_)));
        assert_eq!(service.permission_requests(), 0);
        assert!(matches!(
            provider.fetch_once().await,
            Err(HeartRateError::NotAuthorized)
        ));
    }

    #[tokio::test]
    async fn test_heart_rate_type_removed_after_authorization() {
        let service = Arc::new(InMemoryHealthService::new());
        let provider = HeartRateProvider::live(service.clone());
        assert!(provider.request_authorization().await.is_granted());
        service.push_sample(70.0).await;

        service.set_heart_rate_supported(false);
        let queries = service.queries();

        let error = assert_err!(provider.fetch_once().await);
        assert!(matches!(
            error,
            HeartRateError::TypeUnavailable(SampleType::HeartRate)
        ));

        let error = assert_err!(provider.subscribe(|_| {}, |_| {}).await);
        assert!(matches!(
            error,
            HeartRateError::TypeUnavailable(SampleType::HeartRate)
        ));
        assert!(!provider.has_active_subscription().await);
        assert_eq!(service.queries(), queries);

        service.set_heart_rate_supported(true);
        let reading = assert_ok!(provider.fetch_once().await);
        assert!((reading.bpm() - 70.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_live_fetch() {
        let service = Arc::new(InMemoryHealthService::new());
        let provider = HeartRateProvider::live(service.clone());
        assert!(provider.request_authorization().await.is_granted());

        assert!(matches!(
            provider.fetch_once().await,
            Err(HeartRateError::NoData)
        ));

        service.push_sample(88.0).await;
        let reading = assert_ok!(provider.fetch_once().await);
        assert!((reading.bpm() - 88.0).abs() < f64::EPSILON);

        service.set_query_failure(true);
        let error = assert_err!(provider.fetch_once().await);
        assert!(error.is_platform_error());

        service.set_query_failure(false);
        assert_ok!(provider.fetch_once().await);
    }

    #[tokio::test]
    async fn test_live_subscription_relays_changes() {
        let service = Arc::new(InMemoryHealthService::new());
        let provider = HeartRateProvider::live(service.clone());
        assert!(provider.request_authorization().await.is_granted());

        let (on_reading, on_error, mut readings, mut errors) = channel_callbacks();
        let handle = assert_ok!(provider.subscribe(on_reading, on_error).await);

        service.notify().await;
        assert!(matches!(errors.recv().await, Some(HeartRateError::NoData)));

        service.push_sample(77.0).await;
        let (_, reading) = readings.recv().await.expect("reading relayed");
        assert!((reading.bpm() - 77.0).abs() < f64::EPSILON);

        service.push_sample(79.0).await;
        let (_, reading) = readings.recv().await.expect("reading relayed");
        assert!((reading.bpm() - 79.0).abs() < f64::EPSILON);

        provider.cancel(handle).await;
        service.push_sample(90.0).await;
        tokio::task::yield_now().await;
        assert!(readings.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_live_subscription_ends_with_error_when_platform_stops() {
        let service = Arc::new(InMemoryHealthService::new());
        let provider = HeartRateProvider::live(service.clone());
        assert!(provider.request_authorization().await.is_granted());

        let (on_reading, on_error, _readings, mut errors) = channel_callbacks();
        let handle = assert_ok!(provider.subscribe(on_reading, on_error).await);

        service.close().await;
        assert!(matches!(
            errors.recv().await,
            Some(HeartRateError::Platform(_))
        ));

        tokio::task::yield_now().await;
        assert!(!handle.is_active());
        assert!(!provider.has_active_subscription().await);

        // The slot is free again; the platform itself refuses to observe
        let error = assert_err!(provider.subscribe(|_| {}, |_| {}).await);
        assert!(matches!(error, HeartRateError::Platform(_)));
    }

    #[tokio::test]
    async fn test_from_config() {
        let live_without_service =
            HeartRateProvider::from_config(ProviderConfig::with_mode(ProviderMode::Live), None);
        assert!(matches!(
            live_without_service,
            Err(HeartRateError::InvalidConfiguration(_))
        ));

        let invalid = ProviderConfig {
            mock_interval_ms: 0,
            ..Default::default()
        };
        assert!(HeartRateProvider::from_config(invalid, None).is_err());

        let unbounded = ProviderConfig {
            mock_min_bpm: -1.0e308,
            mock_max_bpm: 1.0e308,
            ..Default::default()
        };
        assert!(matches!(
            HeartRateProvider::from_config(unbounded, None),
            Err(HeartRateError::InvalidConfiguration(_))
        ));

        let service: Arc<dyn HealthService> = Arc::new(InMemoryHealthService::new());
        let live = assert_ok!(HeartRateProvider::from_config(
            ProviderConfig::with_mode(ProviderMode::Live),
            Some(service)
        ));
        assert_eq!(live.mode(), ProviderMode::Live);
        assert!(live.config().mode == ProviderMode::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_mock_interval() {
        let config = ProviderConfig {
            mock_interval_ms: 250,
            ..Default::default()
        };
        let provider = assert_ok!(HeartRateProvider::from_config(config, None));
        assert!(provider.request_authorization().await.is_granted());

        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = count.clone();
        let handle = assert_ok!(
            provider
                .subscribe(
                    move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    },
                    |_| {},
                )
                .await
        );

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        provider.cancel(handle).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }
}
