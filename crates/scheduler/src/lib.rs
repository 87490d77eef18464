pub mod config;
pub mod debounce;
pub mod epoch;
pub mod error;
pub mod metrics;

pub use config::DebounceConfig;
pub use debounce::{CoalescerStats, DebounceCoalescer, FireFn};
pub use epoch::EpochToken;
pub use error::SchedulerError;
