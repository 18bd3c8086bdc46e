pub mod access_log;
pub mod health;
pub mod verification;

pub use access_log::access_history;
pub use health::{health_check, metrics_endpoint, readiness_check};
pub use verification::verify_submission;
