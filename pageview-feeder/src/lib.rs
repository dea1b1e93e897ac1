//! Report requests passing through an HTTP server as pageview events to an
//! analytics collector, without slowing down the requests themselves.
//!
//! Eligible responses are turned into [`PageviewEvent`]s and put on a bounded
//! queue. A single background worker delivers them to the collector, one request
//! per event. Events are dropped when the queue is full.
pub mod config;
pub mod delivery;
pub mod error;
pub mod event;
pub mod feeder;
pub mod filter;
pub mod identity;
pub mod layer;
pub mod proxy;
pub mod queue;
pub mod sink;
pub mod worker;

pub use config::{Config, FeederConfig, Settings};
pub use error::{ConfigError, DeliveryError, Ineligible, SubmitError, WorkerError};
pub use event::PageviewEvent;
pub use feeder::PageviewFeeder;
pub use identity::{RemoteAddr, RequestInfo};
pub use layer::PageviewLayer;
pub use sink::{Capabilities, InterceptingSink, ResponseSink, Unsupported};
