//! One-shot background self-verification after a terminal fetch failure.
//!
//! When pagination dies on a page that should have existed, a detached
//! re-invocation of the tool gets one chance to find out whether the failure
//! was transient. The child carries a hidden marker flag so it can never
//! spawn a grandchild, and the parent neither blocks on nor observes it;
//! the parent's run still ends as failed.

use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::Config;

/// Hidden marker appended to the re-invocation's arguments.
pub const SELF_CHECK_FLAG: &str = "--self-check-run";

/// Launches an independent re-invocation of the tool.
///
/// Process spawning is environment-dependent, so it sits behind this narrow
/// seam; tests substitute a recorder.
pub trait Respawn {
    /// Fire and forget: start the re-invocation and return without
    /// observing it.
    fn respawn(&self, config: &Config) -> Result<()>;
}

/// Spawns the current executable with the effective configuration
/// re-serialized as flags, plus the self-check marker, detached from this
/// process.
pub struct ProcessRespawner;

impl Respawn for ProcessRespawner {
    fn respawn(&self, config: &Config) -> Result<()> {
        let exe = std::env::current_exe().context("cannot locate current executable")?;

        let mut cmd = Command::new(exe);
        cmd.args(config.to_args())
            .arg(SELF_CHECK_FLAG)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // The Child handle is dropped on purpose: no wait, no observation.
        cmd.spawn().context("failed to spawn self-verification run")?;
        Ok(())
    }
}

/// At-most-once scheduler wrapping a [`Respawn`] with the recursion guard.
pub struct SelfCheck {
    respawner: Box<dyn Respawn>,
    suppressed: bool,
    fired: bool,
}

impl SelfCheck {
    /// `is_self_check_run` is the startup marker: a process that is itself
    /// a self-verification child never spawns another.
    pub fn new(respawner: Box<dyn Respawn>, is_self_check_run: bool) -> Self {
        Self {
            respawner,
            suppressed: is_self_check_run,
            fired: false,
        }
    }

    /// Schedule the one background re-invocation.
    ///
    /// No-op when this process carries the marker, or when already fired.
    /// Spawn failures are logged, never propagated; this is a best-effort
    /// diagnostic aid, not a retry mechanism.
    pub fn schedule(&mut self, config: &Config) {
        if self.suppressed {
            debug!("self-verification suppressed: this is already a self-check run");
            return;
        }
        if self.fired {
            return;
        }
        self.fired = true;

        match self.respawner.respawn(config) {
            Ok(()) => info!("scheduled one background self-verification run"),
            Err(e) => warn!("could not schedule self-verification: {e:#}"),
        }
    }
}
