pub mod analysis;
pub mod config;
pub mod scan;
pub mod vulnerability;

pub use analysis::*;
pub use config::{
    CacheConfig, Config, ConfigError, FeatureConfig, FeedConfig, ProviderSettings, RetryConfig,
    ScanConfig,
};
pub use scan::*;
pub use vulnerability::*;
