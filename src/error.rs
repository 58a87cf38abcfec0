//! Error types for the audio pipeline and scheduler.
//!
//! Follows the hand-rolled `Display` + `std::error::Error` pattern used
//! elsewhere in this codebase rather than pulling in an error-derive crate.

use std::fmt;

/// Errors surfaced by the audio pipeline's backend-facing operations.
///
/// Per the pipeline's failure semantics, these only ever abort the single
/// operation (or the single batch element) that triggered them -- already
/// committed state is never rolled back.
#[derive(Debug)]
pub enum PipelineError {
    /// `Initialize` was called on an already-initialized pipeline.
    AlreadyInitialized,
    /// An operation other than `Initialize` was called before it.
    NotInitialized,
    /// The backend failed to open a device, create a source, or similar.
    BackendUnavailable(String),
    /// A chunk failed its submission invariants (format/sample-rate/size).
    InvalidChunk(String),
    /// The backend rejected a buffer allocation, upload, or queue op.
    BackendRejected(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "pipeline already initialized"),
            Self::NotInitialized => write!(f, "pipeline not initialized"),
            Self::BackendUnavailable(msg) => write!(f, "backend unavailable: {}", msg),
            Self::InvalidChunk(msg) => write!(f, "invalid audio chunk: {}", msg),
            Self::BackendRejected(msg) => write!(f, "backend rejected operation: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Errors surfaced by the high-precision scheduler.
#[derive(Debug)]
pub enum SchedulerError {
    /// `Start` was called while the worker thread was already running.
    AlreadyRunning,
    /// The worker thread failed to spawn.
    SpawnFailed(String),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "scheduler already running"),
            Self::SpawnFailed(msg) => write!(f, "failed to spawn scheduler thread: {}", msg),
        }
    }
}

impl std::error::Error for SchedulerError {}

/// Errors surfaced by the A/V reconciliation harness.
#[derive(Debug)]
pub enum HarnessError {
    AlreadyInitialized,
    NotInitialized,
    /// `StartTest` was called with an empty playlist.
    EmptyPlaylist,
    /// `StartTest` was called while a test was already running.
    AlreadyRunning,
    Pipeline(PipelineError),
    Scheduler(SchedulerError),
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "harness already initialized"),
            Self::NotInitialized => write!(f, "harness not initialized"),
            Self::EmptyPlaylist => write!(f, "video playlist must not be empty"),
            Self::AlreadyRunning => write!(f, "a test is already running"),
            Self::Pipeline(e) => write!(f, "pipeline error: {}", e),
            Self::Scheduler(e) => write!(f, "scheduler error: {}", e),
        }
    }
}

impl std::error::Error for HarnessError {}

impl From<PipelineError> for HarnessError {
    fn from(e: PipelineError) -> Self {
        Self::Pipeline(e)
    }
}

impl From<SchedulerError> for HarnessError {
    fn from(e: SchedulerError) -> Self {
        Self::Scheduler(e)
    }
}
