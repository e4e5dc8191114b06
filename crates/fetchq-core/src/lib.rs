pub mod config;
pub mod logging;

pub mod checksum;
pub mod control;
pub mod engine;
pub mod error;
pub mod failure;
pub mod job;
pub mod queue;
pub mod scheduler;
pub mod storage;
