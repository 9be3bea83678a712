//! # reviewwatch-sync
//!
//! Remote query adapter and the synchronization cycle.
//!
//! Call [`SyncCycle::run`] once per timer tick. It queries every non-terminal
//! tracked change through a [`ReviewApi`], writes the results back through the
//! [`ChangeStore`](reviewwatch_core::ChangeStore), and surfaces updates through
//! a [`ViewerHub`] or a [`Notifier`].

pub mod cycle;
pub mod error;
pub mod remote;
pub mod surface;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cycle::{CycleOutcome, RestartToken, SyncCycle};
pub use error::{DeliveryError, RemoteError, SyncError};
pub use remote::{GerritClient, QueryResult, RemoteChange, ReviewApi};
pub use surface::{Notification, Notifier, ViewerHub};
