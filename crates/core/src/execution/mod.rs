pub mod concurrency;
pub mod monitor;
pub mod priority;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;

pub use concurrency::{ConcurrencyController, ConcurrencyStatus};
pub use monitor::{ExecutionMonitor, MonitoredExecution};
pub use priority::{determine_priority, Priority};
pub use queue::{PrioritizedEntry, PriorityQueue, QueueStats};
pub use rate_limit::{RateLimiter, RateLimiterStatus};
pub use retry::RetryPolicy;
pub use scheduler::{RemediationScheduler, SchedulerStatus, SubmissionOutcome};
