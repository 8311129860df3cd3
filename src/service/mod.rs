pub mod cache;
pub mod cache_keys;
pub mod clock;
pub mod metrics;
pub mod orchestrator;
pub mod rate_limiter;
pub mod registry;
pub mod report;
pub mod scan;
pub mod scoring;
pub mod worker_pool;

pub use cache::{CacheStats, ResponseCache, ScoreCache, TtlCache};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
pub use metrics::{Metrics, MetricsSnapshot};
pub use orchestrator::AnalysisService;
pub use rate_limiter::RateLimiter;
pub use registry::ProviderRegistry;
pub use report::{JsonDirectorySink, ReportError, ReportSink, build_report};
pub use scan::{ScanAggregator, ScanError};
pub use worker_pool::{ResponseHandle, SubmitError, WorkerPool};
