use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::delivery::Collector;
use crate::error::{DeliveryError, WorkerError};
use crate::event::PageviewEvent;
use crate::queue::EventReceiver;

/// Something events can be delivered to.
#[async_trait]
pub trait EventDelivery {
    async fn deliver(&self, event: &PageviewEvent) -> Result<(), DeliveryError>;
}

#[async_trait]
impl EventDelivery for Collector {
    async fn deliver(&self, event: &PageviewEvent) -> Result<(), DeliveryError> {
        Collector::deliver(self, event).await
    }
}

/// The single consumer of the event queue. Delivers one event at a time, in queue
/// order, until cancelled.
pub struct DeliveryWorker<D> {
    delivery: Arc<D>,
    receiver: EventReceiver,
    shutdown: CancellationToken,
}

impl<D> Clone for DeliveryWorker<D> {
    fn clone(&self) -> Self {
        Self {
            delivery: self.delivery.clone(),
            receiver: self.receiver.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<D> DeliveryWorker<D>
where
    D: EventDelivery + Send + Sync + 'static,
{
    pub fn new(delivery: D, receiver: EventReceiver, shutdown: CancellationToken) -> Self {
        Self {
            delivery: Arc::new(delivery),
            receiver,
            shutdown,
        }
    }

    /// Run the worker until it is cancelled, restarting it whenever a run ends
    /// abnormally.
    pub async fn supervise(self) {
        loop {
            let worker = self.clone();
            let run = tokio::spawn(async move { worker.run().await });

            let error = match run.await {
                Ok(()) => return,
                Err(e) if e.is_panic() => WorkerError::Panicked(panic_message(e.into_panic())),
                Err(_) => WorkerError::Aborted,
            };

            if !error.is_fault() {
                info!("event delivery worker stopped: {}", error);
                return;
            }

            error!("event delivery worker failed: {}", error);
            if self.shutdown.is_cancelled() {
                return;
            }
            metrics::counter!("pageview_worker_restarts_total").increment(1);
            warn!("restarting event delivery worker");
        }
    }

    /// Deliver events until cancelled. Events still in the queue at that point are
    /// not delivered.
    pub async fn run(&self) {
        let mut receiver = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return,
            receiver = self.receiver.lock() => receiver,
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("event delivery worker shutting down (canceled)");
                    return;
                }
                event = receiver.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!("event queue closed, event delivery worker shutting down");
                        return;
                    }
                },
            };

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("event delivery worker shutting down (canceled)");
                    return;
                }
                _ = self.process(event) => {}
            }
        }
    }

    async fn process(&self, event: PageviewEvent) {
        let now = Instant::now();
        let result = self.delivery.deliver(&event).await;
        let elapsed = now.elapsed().as_secs_f64();

        let outcome = match result {
            Ok(()) => "delivered",
            Err(error) => {
                error!(
                    domain = %event.domain,
                    url = %event.url,
                    "failed to report event: {}",
                    error
                );
                error.outcome()
            }
        };

        metrics::counter!("pageview_deliveries_total", "outcome" => outcome).increment(1);
        metrics::histogram!("pageview_delivery_duration_seconds").record(elapsed);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
