//! Fjord Tasks - a small worker pool
//!
//! [`TaskScheduler`] runs `FnOnce` closures on a fixed set of OS threads
//! pulling from one shared FIFO queue. Use [`TaskScheduler::global`] for the
//! process-wide pool or own an instance for a private one.

mod scheduler;

pub use scheduler::TaskScheduler;
