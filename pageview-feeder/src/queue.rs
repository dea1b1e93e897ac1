use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

use crate::error::SubmitError;
use crate::event::PageviewEvent;

/// Create a bounded queue of pageview events holding at most `capacity` events.
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        EventSender { sender: tx },
        EventReceiver {
            receiver: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producer side of the queue, cloned into every request handling task.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<PageviewEvent>,
}

impl EventSender {
    /// Put an event on the queue without waiting. If the queue is full, the event is
    /// dropped.
    pub fn submit(&self, event: PageviewEvent) -> Result<(), SubmitError> {
        match self.sender.try_send(event) {
            Ok(()) => {
                metrics::counter!("pageview_events_enqueued_total").increment(1);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                metrics::counter!("pageview_events_dropped_total", "cause" => "queue_full")
                    .increment(1);
                Err(SubmitError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                metrics::counter!("pageview_events_dropped_total", "cause" => "closed")
                    .increment(1);
                Err(SubmitError::QueueClosed)
            }
        }
    }
}

/// Consumer side of the queue.
///
/// The receiver sits behind an async mutex so it survives a delivery worker that
/// panicked while holding it: the lock is released on unwind and the next run of
/// the worker picks it up again.
#[derive(Clone, Debug)]
pub struct EventReceiver {
    receiver: Arc<Mutex<mpsc::Receiver<PageviewEvent>>>,
}

impl EventReceiver {
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, mpsc::Receiver<PageviewEvent>> {
        self.receiver.lock().await
    }
}
