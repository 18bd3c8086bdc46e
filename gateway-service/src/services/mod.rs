pub mod database;
pub mod executor;
pub mod hasher;
pub mod metrics;
pub mod storage;

pub use database::Database;
pub use executor::CommandExecutor;
pub use storage::EvidenceStore;
