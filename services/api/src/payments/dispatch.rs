//! services/api/src/payments/dispatch.rs
//!
//! The Payment Dispatch Queue: a bounded, deduplicating queue of charge
//! requests drained by a single worker at a fixed cadence, so that outbound
//! calls stay under the provider's rate ceiling no matter how many customers
//! check out at once.

use bar_bot_core::domain::ChargeRequest;
use bar_bot_core::phone::{mask, to_provider_format};
use bar_bot_core::ports::PaymentGateway;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Minimum spacing between two outbound charge requests.
    pub interval: Duration,
    pub capacity: usize,
    /// How long a phone with a recorded request is shielded from another one.
    pub dedup_window: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2100),
            capacity: 100,
            dedup_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("payment queue is full")]
    Busy,
    #[error("payment dispatcher has stopped")]
    Closed,
}

/// How an accepted request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// A request for the same phone is already in flight; nothing was queued.
    Deduplicated,
}

struct QueuedCharge {
    request: ChargeRequest,
    recorded_at: Instant,
}

/// Phones with an outstanding or recent request, keyed in provider format.
type RecentPhones = Arc<Mutex<HashMap<String, Instant>>>;

/// The producer side, cheap to clone into every component that charges.
#[derive(Clone)]
pub struct DispatchQueue {
    sender: mpsc::Sender<QueuedCharge>,
    recent: RecentPhones,
    dedup_window: Duration,
}

impl DispatchQueue {
    /// Creates the queue and the worker that drains it. The worker does
    /// nothing until [`DispatchWorker::run`] is spawned.
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        settings: DispatchSettings,
    ) -> (Self, DispatchWorker) {
        let (sender, receiver) = mpsc::channel(settings.capacity.max(1));
        let recent: RecentPhones = Arc::new(Mutex::new(HashMap::new()));
        let queue = Self {
            sender,
            recent: recent.clone(),
            dedup_window: settings.dedup_window,
        };
        let worker = DispatchWorker {
            receiver,
            gateway,
            recent,
            interval: settings.interval,
        };
        (queue, worker)
    }

    /// Accepts a charge without waiting. Fails fast with `Busy` when the queue
    /// is full.
    pub fn enqueue(
        &self,
        order_id: Uuid,
        phone: &str,
        amount: Decimal,
    ) -> Result<Enqueued, DispatchError> {
        let provider_phone = to_provider_format(phone);
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(recorded_at) = recent.get(&provider_phone) {
            if recorded_at.elapsed() < self.dedup_window {
                info!(
                    %order_id,
                    phone = %mask(&provider_phone),
                    "Charge already in flight for this phone; skipping duplicate"
                );
                return Ok(Enqueued::Deduplicated);
            }
        }

        let recorded_at = Instant::now();
        let charge = QueuedCharge {
            request: ChargeRequest {
                order_id,
                phone: provider_phone.clone(),
                amount,
            },
            recorded_at,
        };
        match self.sender.try_send(charge) {
            Ok(()) => {
                recent.insert(provider_phone, recorded_at);
                info!(%order_id, %amount, "Charge queued");
                Ok(Enqueued::Queued)
            }
            Err(TrySendError::Full(_)) => Err(DispatchError::Busy),
            Err(TrySendError::Closed(_)) => Err(DispatchError::Closed),
        }
    }

    /// Charges accepted but not yet picked up by the worker.
    #[cfg(test)]
    pub(crate) fn backlog(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

//=========================================================================================
// Worker
//=========================================================================================

pub struct DispatchWorker {
    receiver: mpsc::Receiver<QueuedCharge>,
    gateway: Arc<dyn PaymentGateway>,
    recent: RecentPhones,
    interval: Duration,
}

impl DispatchWorker {
    /// Drains the queue, one request per tick, until `shutdown` fires or every
    /// producer is gone.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.receiver.recv() => next,
            };
            let Some(charge) = next else { break };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.dispatch(charge).await;
        }
        info!("Payment dispatch worker stopped");
    }

    async fn dispatch(&self, charge: QueuedCharge) {
        let request = &charge.request;
        match self.gateway.initiate_charge(request).await {
            Ok(reference) => info!(
                order_id = %request.order_id,
                phone = %mask(&request.phone),
                reference = reference.as_deref().unwrap_or(""),
                "Charge prompt sent"
            ),
            Err(e) => error!(
                order_id = %request.order_id,
                phone = %mask(&request.phone),
                error = %e,
                "Charge prompt failed"
            ),
        }

        // Only clear the marker this request set; a newer one may have replaced it.
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if recent.get(&request.phone) == Some(&charge.recorded_at) {
            recent.remove(&request.phone);
        }
    }
}
