use thiserror::Error;

/// Errors surfaced by the scheduler facade.
///
/// "Already running" / "not running" are not errors: they are reported through
/// [`StartOutcome`](crate::models::StartOutcome) and
/// [`StopOutcome`](crate::models::StopOutcome). Failures of individual features
/// never reach this type either; they are recorded on the feature itself.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
