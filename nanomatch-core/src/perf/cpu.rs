//! CPU affinity and thread priority for pipeline stages
//!
//! Every pipeline stage runs on its own thread, and latency jitter drops
//! sharply when those threads stop migrating between cores. Stages call
//! [`setup_stage_thread`] at the top of their run loop.

use anyhow::Result;
use core_affinity::CoreId;

/// Pin the current thread to a specific CPU core.
pub fn pin_to_core(core: usize) -> Result<()> {
    let core_id = CoreId { id: core };

    if core_affinity::set_for_current(core_id) {
        tracing::info!(core, "pinned thread to CPU core");
        Ok(())
    } else {
        anyhow::bail!("failed to pin thread to core {core}")
    }
}

/// Set SCHED_FIFO real-time priority for the current thread (Linux only).
///
/// Requires CAP_SYS_NICE or root.
#[cfg(target_os = "linux")]
pub fn set_realtime_priority(priority: i32) -> Result<()> {
    use libc::{sched_param, sched_setscheduler, SCHED_FIFO};

    let param = sched_param {
        sched_priority: priority,
    };

    // SAFETY: sched_setscheduler only reads the param struct.
    let rc = unsafe { sched_setscheduler(0, SCHED_FIFO, &param) };
    if rc == 0 {
        tracing::info!(priority, "thread scheduling set to SCHED_FIFO");
        Ok(())
    } else {
        anyhow::bail!("failed to set SCHED_FIFO priority {priority} (needs CAP_SYS_NICE)")
    }
}

/// Real-time priority is unsupported off Linux; warns and continues.
#[cfg(not(target_os = "linux"))]
pub fn set_realtime_priority(_priority: i32) -> Result<()> {
    tracing::warn!("real-time priority not supported on this platform");
    Ok(())
}

/// Number of CPU cores visible to this process.
pub fn num_cores() -> usize {
    core_affinity::get_core_ids()
        .map(|ids| ids.len())
        .unwrap_or(1)
}

/// Standard setup at the top of a stage thread: pin when a core was
/// configured, and log either way. Pinning failure is reported but not
/// fatal - the stage still runs, just without affinity.
pub fn setup_stage_thread(stage: &str, core: Option<usize>) {
    match core {
        Some(core) => {
            if let Err(error) = pin_to_core(core) {
                tracing::warn!(stage, core, %error, "running without core affinity");
            }
        }
        None => tracing::debug!(stage, "no core configured, running unpinned"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_cores_positive() {
        assert!(num_cores() > 0);
    }

    #[test]
    fn test_setup_stage_thread_tolerates_bad_core() {
        // An absurd core id must not panic the stage.
        setup_stage_thread("test-stage", Some(usize::MAX - 1));
        setup_stage_thread("test-stage", None);
    }
}
