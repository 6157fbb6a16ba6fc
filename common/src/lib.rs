// Scheduled-post publishing core shared by the scheduler binary

pub mod bootstrap;
pub mod clock;
pub mod codec;
pub mod config;
pub mod db;
pub mod errors;
pub mod identity;
pub mod lock;
pub mod models;
pub mod notify;
pub mod publisher;
pub mod record_log;
pub mod record_store;
pub mod scheduler;
pub mod status;
pub mod storage;
pub mod telemetry;
