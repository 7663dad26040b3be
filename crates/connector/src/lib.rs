pub mod adapter;
pub mod adapters;
pub mod error;
pub mod session;
mod worker;

pub use adapter::{AdapterKind, RawTable, Settings, SourceAdapter, SourceDescriptor};
pub use error::SessionError;
pub use session::{ConnectionSession, SessionEvent, SessionState};
