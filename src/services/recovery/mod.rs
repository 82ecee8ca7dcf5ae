pub mod engine;
pub mod fallback_cache;
pub mod retry;

pub use engine::{
    ErrorContext, ErrorRecoveryEngine, RecoveryOutcome, RecoverySettings, RecoveryStrategy,
};
pub use fallback_cache::{FallbackCache, FallbackCacheEntry, phase_key, service_key};
pub use retry::{RetryPolicy, RetryRecord, RetryTracker};
