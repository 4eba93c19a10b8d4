use uuid::Uuid;

/// The five-class failure taxonomy of the dispatch core.
///
/// Handler errors are still captured as strings on the job row
/// (`error_message`); this enum exists so executor and dispatcher code can
/// match on *kind* of failure instead of sniffing strings.
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("job {0} could not be claimed (wrong state, already locked, or already terminal)")]
    ClaimLost(Uuid),

    #[error("no handler registered for job type {0:?}")]
    NoHandler(String),

    #[error("handler failed: {0}")]
    HandlerFailed(String),

    #[error("job timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("store or queue backend unreachable: {0}")]
    Infrastructure(String),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
