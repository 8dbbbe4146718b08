pub mod api;
pub mod calibration;
pub mod config;
pub mod error;
pub mod runner;
pub mod scheduler;
pub mod shutdown;
pub mod worker;
