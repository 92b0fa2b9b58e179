//! Cooperative shutdown
//!
//! Signal-driven teardown for the pipeline: a [`KillSwitch`] flips on
//! SIGINT/SIGTERM, stage run loops poll it, producers stop submitting,
//! consumers drain their rings, threads join.

pub mod kill_switch;

pub use kill_switch::KillSwitch;
