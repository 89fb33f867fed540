//! The platform health service seam.
//!
//! The provider needs exactly three things from the host platform: a permission
//! grant, the most recent sample of a type, and a stream of "something changed"
//! notifications. [`HealthService`] captures those; [`InMemoryHealthService`] is a
//! scripted implementation for tests and demos, and
//! [`BleHealthService`](crate::ble::BleHealthService) talks to a Bluetooth sensor.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::{
    error::{HeartRateError, Result},
    types::{AccessRequest, Sample, SampleType},
};

/// Stream of change notifications from a health service
///
/// Every item means "the most recent sample may have changed"; an `Err` item
/// reports a failure in the observation itself. The stream ends when the
/// service stops observing.
pub type ChangeStream = BoxStream<'static, Result<()>>;

/// Capacity of the change notification channel
///
/// Notifications carry no payload, so a lagging observer only needs to know
/// that at least one change happened.
pub const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// A platform service that owns health samples
#[async_trait]
pub trait HealthService: Send + Sync {
    /// Ask the user/platform for access
    ///
    /// Returns `Ok(true)` when granted and `Ok(false)` when refused.
    async fn request_permission(&self, request: &AccessRequest) -> Result<bool>;

    /// Latest sample of the given type, if any exists
    async fn query_most_recent_sample(&self, sample_type: SampleType) -> Result<Option<Sample>>;

    /// Register for change notifications on the given type
    async fn observe(&self, sample_type: SampleType) -> Result<ChangeStream>;

    /// Whether the platform knows about this data type at all
    fn supports(&self, _sample_type: SampleType) -> bool {
        true
    }
}

/// Turn a broadcast receiver into a [`ChangeStream`]
///
/// Lagged receivers collapse the missed notifications into one.
pub(crate) fn change_stream(receiver: broadcast::Receiver<()>) -> ChangeStream {
    Box::pin(stream::unfold(receiver, |mut receiver| async move {
        match receiver.recv().await {
            Ok(()) => Some((Ok(()), receiver)),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!("Change observer lagged by {} notification(s)", missed);
                Some((Ok(()), receiver))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }))
}

/// How an [`InMemoryHealthService`] answers permission requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionResponse {
    /// Grant access
    Grant,
    /// Refuse access
    Deny,
    /// Fail with the given reason
    Fail(String),
}

/// Scripted in-memory health service
///
/// Samples are pushed by the owner; each push notifies observers the way a
/// real platform would after recording a new value.
pub struct InMemoryHealthService {
    response: RwLock<PermissionResponse>,
    heart_rate_supported: AtomicBool,
    latest: RwLock<Option<Sample>>,
    changes: RwLock<Option<broadcast::Sender<()>>>,
    last_request: RwLock<Option<AccessRequest>>,
    permission_requests: AtomicUsize,
    queries: AtomicUsize,
    fail_queries: AtomicBool,
}

impl Default for InMemoryHealthService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHealthService {
    /// A service that grants access and supports heart rate
    #[must_use]
    pub fn new() -> Self {
        Self::with_response(PermissionResponse::Grant)
    }

    /// A service that answers permission requests with `response`
    #[must_use]
    pub fn with_response(response: PermissionResponse) -> Self {
        let (sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            response: RwLock::new(response),
            heart_rate_supported: AtomicBool::new(true),
            latest: RwLock::new(None),
            changes: RwLock::new(Some(sender)),
            last_request: RwLock::new(None),
            permission_requests: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            fail_queries: AtomicBool::new(false),
        }
    }

    /// A service that refuses access
    #[must_use]
    pub fn denying() -> Self {
        Self::with_response(PermissionResponse::Deny)
    }

    /// A service whose permission request fails
    #[must_use]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self::with_response(PermissionResponse::Fail(reason.into()))
    }

    /// A service that has no heart rate data type
    #[must_use]
    pub fn without_heart_rate() -> Self {
        Self {
            heart_rate_supported: AtomicBool::new(false),
            ..Self::new()
        }
    }

    /// Change the answer to future permission requests
    pub async fn set_response(&self, response: PermissionResponse) {
        *self.response.write().await = response;
    }

    /// Add or remove the heart rate data type
    pub fn set_heart_rate_supported(&self, supported: bool) {
        self.heart_rate_supported.store(supported, Ordering::SeqCst);
    }

    /// Make future queries fail with a platform error
    pub fn set_query_failure(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Record a new heart rate sample and notify observers
    pub async fn push_sample(&self, bpm: f64) {
        self.push(Sample::now(bpm)).await;
    }

    /// Record a sample with its own timestamp and notify observers
    pub async fn push(&self, sample: Sample) {
        *self.latest.write().await = Some(sample);
        self.notify().await;
    }

    /// Notify observers without recording anything
    pub async fn notify(&self) {
        if let Some(sender) = self.changes.read().await.as_ref() {
            // No receivers just means nobody is observing yet
            let _ = sender.send(());
        }
    }

    /// End every observation stream
    pub async fn close(&self) {
        self.changes.write().await.take();
    }

    /// Number of permission requests received
    #[must_use]
    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }

    /// Number of sample queries received
    #[must_use]
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// The most recent permission request
    pub async fn last_request(&self) -> Option<AccessRequest> {
        self.last_request.read().await.clone()
    }

    fn check_type(&self, sample_type: SampleType) -> Result<()> {
        if self.supports(sample_type) {
            Ok(())
        } else {
            Err(HeartRateError::TypeUnavailable(sample_type))
        }
    }
}

#[async_trait]
impl HealthService for InMemoryHealthService {
    async fn request_permission(&self, request: &AccessRequest) -> Result<bool> {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        *self.last_request.write().await = Some(request.clone());

        match &*self.response.read().await {
            PermissionResponse::Grant => Ok(true),
            PermissionResponse::Deny => Ok(false),
            PermissionResponse::Fail(reason) => Err(HeartRateError::Platform(reason.clone())),
        }
    }

    async fn query_most_recent_sample(&self, sample_type: SampleType) -> Result<Option<Sample>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.check_type(sample_type)?;

        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(HeartRateError::Platform("sample query failed".to_string()));
        }

        if sample_type == SampleType::HeartRate {
            Ok(*self.latest.read().await)
        } else {
            Ok(None)
        }
    }

    async fn observe(&self, sample_type: SampleType) -> Result<ChangeStream> {
        self.check_type(sample_type)?;

        match self.changes.read().await.as_ref() {
            Some(sender) => Ok(change_stream(sender.subscribe())),
            None => Err(HeartRateError::Platform(
                "health service is no longer observing".to_string(),
            )),
        }
    }

    fn supports(&self, sample_type: SampleType) -> bool {
        match sample_type {
            SampleType::HeartRate => self.heart_rate_supported.load(Ordering::SeqCst),
            SampleType::Workout => true,
        }
    }
}
