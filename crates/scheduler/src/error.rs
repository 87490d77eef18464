use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("quiet window must be between 1 and {max} ms, got {got}")]
    InvalidWindow { got: u64, max: u64 },
}

impl From<SchedulerError> for flockview_core_types::FlockError {
    fn from(value: SchedulerError) -> Self {
        flockview_core_types::FlockError::new(value.to_string())
    }
}
