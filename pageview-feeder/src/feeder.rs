use std::sync::Arc;

use http::StatusCode;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{FeederConfig, Settings};
use crate::delivery::Collector;
use crate::error::{ConfigError, Ineligible, SubmitError};
use crate::event::PageviewEvent;
use crate::filter::{check_resource, check_status, resolve_domain};
use crate::identity::{resolve_remote_ip, RequestInfo};
use crate::queue::{event_queue, EventSender};
use crate::worker::DeliveryWorker;

/// Handle to a running pageview pipeline: the settings, the producer side of the
/// event queue and the delivery worker.
///
/// Cloning is cheap, all clones share the same queue and worker.
#[derive(Clone)]
pub struct PageviewFeeder {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    settings: Settings,
    sender: EventSender,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PageviewFeeder {
    /// Validate `config` and start the delivery worker. The worker stops when
    /// `shutdown` is cancelled, or when [`PageviewFeeder::shutdown`] is called.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        name: &str,
        config: FeederConfig,
        shutdown: &CancellationToken,
    ) -> Result<Self, ConfigError> {
        let settings = config.normalize()?;
        let collector = Collector::new(settings.event_endpoint.clone(), settings.request_timeout)?;

        info!(
            name,
            endpoint = %settings.event_endpoint,
            domains = ?settings.domains,
            report_extensions = ?settings.report_extensions,
            report_all_resources = settings.report_all_resources,
            report_any_host = settings.report_any_host,
            report_errors = settings.report_errors,
            remote_ip_from_header = ?settings.remote_ip_from_header,
            queue_size = settings.queue_size,
            "creating pageview feeder"
        );

        let (sender, receiver) = event_queue(settings.queue_size);
        let shutdown = shutdown.child_token();
        let worker = DeliveryWorker::new(collector, receiver, shutdown.clone());
        let handle = tokio::spawn(worker.supervise());

        Ok(Self::from_parts(name, settings, sender, shutdown, Some(handle)))
    }

    pub(crate) fn from_parts(
        name: &str,
        settings: Settings,
        sender: EventSender,
        shutdown: CancellationToken,
        worker: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_owned(),
                settings,
                sender,
                shutdown,
                worker: Mutex::new(worker),
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Whether a request for `path` on `host` could be reported at all. Responses
    /// to other requests need not be intercepted.
    pub fn should_intercept(&self, host: &str, path: &str) -> bool {
        match check_resource(&self.inner.settings, host, path) {
            Ok(()) => true,
            Err(reason) => {
                debug!("not reporting request: {}", reason);
                false
            }
        }
    }

    /// Build the event for a request that was answered with `status`.
    pub fn build_event(
        &self,
        request: &RequestInfo,
        status: u16,
    ) -> Result<PageviewEvent, Ineligible> {
        let settings = &self.inner.settings;

        check_status(settings, status)?;
        let domain = resolve_domain(settings, &request.host)?;
        let remote_ip = resolve_remote_ip(settings, request)?;

        Ok(PageviewEvent::new(
            request.user_agent.clone(),
            remote_ip,
            domain.to_owned(),
            request.url.clone(),
            status,
        ))
    }

    /// Report a request whose response status just became known, if it should be
    /// reported. Never waits: when the queue is full the event is dropped.
    pub fn observe(&self, request: &RequestInfo, status: StatusCode) {
        let event = match self.build_event(request, status.as_u16()) {
            Ok(event) => event,
            Err(reason) => {
                debug!("not reporting request: {}", reason);
                return;
            }
        };

        match self.inner.sender.submit(event) {
            Ok(()) => {}
            Err(SubmitError::QueueFull) => {
                warn!("pageview feeder {:?} failed to submit event: queue full", self.inner.name)
            }
            Err(e @ SubmitError::QueueClosed) => {
                error!("pageview feeder {:?} failed to submit event: {}", self.inner.name, e)
            }
        }
    }

    /// Stop the delivery worker and wait for it to finish. Queued events are not
    /// delivered.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        if let Some(handle) = self.inner.worker.lock().await.take() {
            if let Err(e) = handle.await {
                error!("pageview feeder {:?} worker did not stop cleanly: {}", self.inner.name, e);
            }
        }
    }
}
