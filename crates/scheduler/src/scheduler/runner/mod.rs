//! The scheduler aggregate and its passes.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructor, registration, and accessor methods
//! - `scheduling`: ScheduledSet/PendingSet bookkeeping and context state changes
//! - `execution`: one scheduling pass and dispatch of its steps
//! - `lifecycle`: run/pause/resume/shutdown, the settle loop, and the event pump

mod core;
mod execution;
mod lifecycle;
mod scheduling;
#[cfg(test)]
mod tests;

pub use self::core::Scheduler;
