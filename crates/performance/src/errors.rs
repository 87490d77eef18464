use flockview_core_types::FlockError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PerformanceError {
    #[error("insufficient data: no ewes mated")]
    InsufficientData,
    #[error("malformed distribution: {0}")]
    MalformedDistribution(String),
}

impl From<PerformanceError> for FlockError {
    fn from(value: PerformanceError) -> Self {
        match value {
            PerformanceError::InsufficientData => FlockError::InsufficientData {
                group: String::from("unknown"),
            },
            other => FlockError::new(other.to_string()),
        }
    }
}
