//! Replaying queued tasks against the backend.

mod dispatcher;
mod http;
mod network;
mod observer;
mod orchestrator;

pub use dispatcher::{dispatch, DispatchError, TaskDispatcher};
pub use http::HttpDispatcher;
pub use network::NetworkMonitor;
pub use observer::{Attributes, ObservedSpan, Observer, TracingObserver};
pub use orchestrator::{DrainOutcome, DrainReport, DrainTrigger, SyncOrchestrator};
