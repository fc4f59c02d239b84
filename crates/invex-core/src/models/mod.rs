//! Data models shared by the queue, pipeline and quality monitor.

pub mod config;
pub mod record;
pub mod schema;
pub mod task;
