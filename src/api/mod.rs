pub mod analysis;
pub mod error;
pub mod health;
pub mod metrics;
pub mod scans;

pub use error::{ApiError, ErrorResponse};
