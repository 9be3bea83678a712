//! reviewwatch daemon: update service, viewer socket and notification surface.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod service;
pub mod viewers;

pub use error::DaemonError;
pub use protocol::{request, send_request, subscribe, ConnectionTarget, Message, Push, Reply, Subscription};
pub use runtime::{run, serve, start_blocking};
pub use service::{ServiceController, ServiceState};
pub use viewers::{LogNotifier, SubscriberHub};
