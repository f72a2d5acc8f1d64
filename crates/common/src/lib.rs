// limpet-common: shared types for the limpet workspace

pub mod error;
pub mod model;

pub use error::{KernelError, KernelResult, StorageError};
pub use model::{
    DocClass, LogEntry, Metadata, ScheduleState, StatusSummary, TrackedDocument, Version,
};
