pub mod cli;
pub mod config;
pub mod installer;
pub mod job;
pub mod lock;
pub mod notify;
pub mod pool;
pub mod report;
pub mod util;
