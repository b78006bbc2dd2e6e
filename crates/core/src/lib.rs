//! Core types, storage ports, and domain events for the pharmacy sync service.

pub mod clock;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod policy;
pub mod probe;
pub mod records;
pub mod store;

pub use clock::*;
pub use dispatch::*;
pub use error::{CallbackError, ChannelError, Error, ErrorCode, FailurePolicy, Result, StoreError};
pub use events::*;
pub use policy::*;
pub use probe::*;
pub use records::*;
pub use store::*;
