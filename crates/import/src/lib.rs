pub mod error;
pub mod error_log;
pub mod orchestrator;
pub mod sink;
pub mod specification;

pub use error::ImportError;
pub use orchestrator::{
    CancelHandle, ImportCheckpoint, ImportOptions, ImportOrchestrator, ImportReport, TableFailure,
};
pub use sink::{ImportSink, JsonlSink, MemorySink, SinkReport};
pub use specification::ImportSpecification;
