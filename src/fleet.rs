//! Fleet-level orchestration: start or power off every configured VM, and
//! the interactive start-confirm-kill session.
//!
//! VMs are processed strictly in configuration order, one at a time. A VM
//! whose unlock fails is powered off and counted, and the sweep moves on;
//! only a broken process-execution facility aborts the loop.

use std::io::Write;

use crate::error::FlotillaError;
use crate::lifecycle::{Lifecycle, StartOutcome};
use crate::runner::CommandRunner;
use crate::vm::Vm;

/// Counts of what a fleet-wide start did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FleetSummary {
    pub started: usize,
    pub unlock_failed: usize,
    pub skipped: usize,
}

/// Answers the two questions the interactive session asks. Split out so
/// session tests can script replies instead of owning a terminal.
pub trait SessionPrompt {
    /// Ask whether the started VMs should be powered off; returns the raw
    /// response line.
    fn confirm_kill(&mut self) -> Result<String, FlotillaError>;

    /// Block until the operator acknowledges the session is over.
    fn acknowledge(&mut self) -> Result<(), FlotillaError>;
}

/// Prompts on stdin/stdout.
pub struct TerminalPrompt;

impl SessionPrompt for TerminalPrompt {
    fn confirm_kill(&mut self) -> Result<String, FlotillaError> {
        read_reply("Kill VMs? [Y/n] ")
    }

    fn acknowledge(&mut self) -> Result<(), FlotillaError> {
        read_reply("Done, press enter to continue ").map(|_| ())
    }
}

fn read_reply(question: &str) -> Result<String, FlotillaError> {
    print!("{question}");
    std::io::stdout()
        .flush()
        .map_err(|e| FlotillaError::Prompt {
            message: e.to_string(),
        })?;

    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .map_err(|e| FlotillaError::Prompt {
            message: e.to_string(),
        })?;
    Ok(line)
}

/// Applies lifecycle operations across a whole configured fleet.
pub struct Fleet<R> {
    lifecycle: Lifecycle<R>,
}

impl<R: CommandRunner> Fleet<R> {
    pub fn new(runner: R) -> Self {
        Self {
            lifecycle: Lifecycle::new(runner),
        }
    }

    /// The underlying per-VM controller, for single-VM operations.
    pub fn lifecycle(&mut self) -> &mut Lifecycle<R> {
        &mut self.lifecycle
    }

    /// Start every VM in order. Unlock failures are counted, not fatal.
    pub async fn start_all(&mut self, vms: &[Vm]) -> Result<FleetSummary, FlotillaError> {
        let mut summary = FleetSummary::default();
        for vm in vms {
            match self.lifecycle.start(vm).await? {
                StartOutcome::Started | StartOutcome::Unlocked => summary.started += 1,
                StartOutcome::UnlockFailed => summary.unlock_failed += 1,
                StartOutcome::AlreadyRunning => summary.skipped += 1,
            }
        }
        tracing::info!(
            started = summary.started,
            unlock_failed = summary.unlock_failed,
            skipped = summary.skipped,
            "fleet start finished"
        );
        Ok(summary)
    }

    /// Power off every VM in order, whatever state the map has for them.
    pub async fn kill_all(&mut self, vms: &[Vm]) -> Result<(), FlotillaError> {
        for vm in vms {
            self.lifecycle.kill(vm).await?;
        }
        tracing::info!(count = vms.len(), "fleet powered off");
        Ok(())
    }

    /// Start every VM, then offer to power the fleet back off. Any answer
    /// except `n` (case-insensitive, surrounding whitespace ignored) kills;
    /// a final acknowledgment keeps the window open until the operator has
    /// read the output.
    pub async fn run_session(
        &mut self,
        vms: &[Vm],
        prompt: &mut dyn SessionPrompt,
    ) -> Result<(), FlotillaError> {
        self.start_all(vms).await?;

        let answer = prompt.confirm_kill()?;
        if !answer.trim().eq_ignore_ascii_case("n") {
            self.kill_all(vms).await?;
        }

        prompt.acknowledge()
    }
}
