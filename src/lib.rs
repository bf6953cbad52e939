pub mod config;
pub mod engine;
pub mod idempotency;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod protocol;
pub mod reaper;
pub mod wal;
