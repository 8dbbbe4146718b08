//! Background execution of admitted jobs.
//!
//! A single worker task drains a capacity-one queue filled by the
//! [`AdmissionGate`](crate::scheduler::AdmissionGate). Each job is executed on
//! the blocking thread pool and moves the shared run state through its
//! lifecycle:
//!
//! 1. publish a `running` record and set the run item
//! 2. re-resolve the runnable through the registry and execute it
//! 3. publish the `finished` or `error` record
//! 4. release the single-flight token

pub mod executor;

pub use executor::{Job, JobExecutor};
