use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::debug;

use crate::{error::HeartRateError, types::Reading};

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

type ReadingCallback = Box<dyn Fn(Reading) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(HeartRateError) + Send + Sync>;

/// Serializes callback delivery with cancellation
///
/// A callback only runs while the delivery lock is held and the gate is open.
/// Closing takes the same lock, so once `close` returns no callback is running
/// and none will start.
pub(crate) struct DeliveryGate {
    closed: AtomicBool,
    delivery: Mutex<()>,
    on_reading: ReadingCallback,
    on_error: ErrorCallback,
}

impl DeliveryGate {
    pub(crate) fn new<R, E>(on_reading: R, on_error: E) -> Arc<Self>
    where
        R: Fn(Reading) + Send + Sync + 'static,
        E: Fn(HeartRateError) + Send + Sync + 'static,
    {
        Arc::new(Self {
            closed: AtomicBool::new(false),
            delivery: Mutex::new(()),
            on_reading: Box::new(on_reading),
            on_error: Box::new(on_error),
        })
    }

    /// Deliver a reading; returns `false` once the gate is closed
    pub(crate) async fn reading(&self, reading: Reading) -> bool {
        let _delivery = self.delivery.lock().await;
        if self.is_closed() {
            return false;
        }
        (self.on_reading)(reading);
        true
    }

    /// Deliver an error; returns `false` once the gate is closed
    pub(crate) async fn error(&self, error: HeartRateError) -> bool {
        let _delivery = self.delivery.lock().await;
        if self.is_closed() {
            return false;
        }
        (self.on_error)(error);
        true
    }

    /// Close and wait for any in-flight callback to return
    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _delivery = self.delivery.lock().await;
    }

    /// Close without waiting
    pub(crate) fn close_now(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Handle to a running heart rate subscription
///
/// Cancel it with [`SubscriptionHandle::cancel`] (or
/// [`HeartRateProvider::cancel`](crate::HeartRateProvider::cancel)). Dropping the
/// handle aborts the delivery task too, but without waiting for a callback that
/// is already running.
pub struct SubscriptionHandle {
    id: u64,
    gate: Arc<DeliveryGate>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(gate: Arc<DeliveryGate>, task: JoinHandle<()>) -> Self {
        Self {
            id: NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed),
            gate,
            task: Some(task),
        }
    }

    /// Unique identifier of this subscription
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Whether readings may still be delivered
    ///
    /// Becomes `false` after cancellation or when the underlying source ends.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.gate.is_closed()
    }

    /// Stop delivery
    ///
    /// When this returns, no callback of this subscription is running and none
    /// will run again.
    pub async fn cancel(mut self) {
        self.gate.close().await;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        debug!("Subscription {} cancelled", self.id);
    }

    pub(crate) fn gate(&self) -> &Arc<DeliveryGate> {
        &self.gate
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.gate.close_now();
            task.abort();
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
