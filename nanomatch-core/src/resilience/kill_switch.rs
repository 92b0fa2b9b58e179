//! Kill switch - signal-driven orderly teardown
//!
//! One atomic flag shared by the signal handler and every stage loop.
//! `install` registers SIGINT and SIGTERM to set the flag (signal-safe:
//! the handler is a single atomic store), `should_stop` is the poll the
//! stage loops make each iteration, and `shutdown` lets code trigger the
//! same path programmatically with a recorded reason.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use parking_lot::Mutex;

/// Shared shutdown flag with an optional recorded reason.
#[derive(Clone, Default)]
pub struct KillSwitch {
    stop: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
    since: Arc<Mutex<Option<SystemTime>>>,
}

impl KillSwitch {
    /// Fresh switch in the running state, no signals registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a switch and register SIGINT + SIGTERM to trip it.
    pub fn install() -> Result<Self> {
        let switch = Self::new();

        #[cfg(unix)]
        {
            signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&switch.stop))
                .context("failed to register SIGINT handler")?;
            signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&switch.stop))
                .context("failed to register SIGTERM handler")?;
            tracing::info!("kill switch armed on SIGINT/SIGTERM");
        }

        Ok(switch)
    }

    /// Poll made by every stage loop.
    #[inline]
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Trip the switch programmatically.
    pub fn shutdown(&self, reason: &str) {
        tracing::info!(reason, "shutdown requested");
        *self.reason.lock() = Some(reason.to_string());
        *self.since.lock() = Some(SystemTime::now());
        self.stop.store(true, Ordering::Release);
    }

    /// Recorded reason, if `shutdown` was the trigger. A signal trips the
    /// bare flag and leaves this unset.
    pub fn shutdown_reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// When `shutdown` was called.
    pub fn shutdown_time(&self) -> Option<SystemTime> {
        *self.since.lock()
    }
}
