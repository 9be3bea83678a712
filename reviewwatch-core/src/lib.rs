//! reviewwatch core library — domain types, label resolution, persistence.
//!
//! - [`types`] — tracked changes and connection options
//! - [`labels`] — reduce a label's votes to one value
//! - [`store`] — key-value primitive and the typed [`ChangeStore`]
//! - [`error`] — [`CoreError`], [`LabelError`]

pub mod error;
pub mod labels;
pub mod store;
pub mod types;

pub use error::{CoreError, LabelError};
pub use store::{ChangeStore, JsonFileStore, KeyValueStore, MemoryStore};
pub use types::{ChangeId, ChangeStatus, ConnectionOptions, Credentials, TrackedChange};
