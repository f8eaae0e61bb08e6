//! Per-VM lifecycle: start, the disk-unlock sub-protocol, and power-off.
//!
//! The controller keeps an in-memory map of what it has issued for each VM.
//! Nothing is observed back from the hypervisor, so the map reflects this
//! process's view only: enough to refuse a double start, while power-off
//! stays unconditional because powering off a stopped VM is harmless.

use std::collections::HashMap;

use crate::error::FlotillaError;
use crate::runner::CommandRunner;
use crate::vm::Vm;

/// Where a VM is in its lifecycle, as tracked by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Stopped,
    Starting,
    Unlocking,
    Running,
}

impl VmState {
    /// States in which another start would double-start the VM.
    fn is_active(self) -> bool {
        matches!(self, VmState::Starting | VmState::Unlocking | VmState::Running)
    }
}

/// What a start operation did for one VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Plain VM started.
    Started,
    /// Encrypted VM started and the unlock pair went through.
    Unlocked,
    /// The unlock failed and the VM was powered back off.
    UnlockFailed,
    /// The state map says the VM is already up; no commands were issued.
    AlreadyRunning,
}

/// Drives individual VMs through their lifecycle via a [`CommandRunner`].
pub struct Lifecycle<R> {
    runner: R,
    states: HashMap<String, VmState>,
}

impl<R: CommandRunner> Lifecycle<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            states: HashMap::new(),
        }
    }

    /// Tracked state for a VM, if any operation has touched it.
    pub fn state(&self, name: &str) -> Option<VmState> {
        self.states.get(name).copied()
    }

    /// Start a VM: `startvm`, then for encrypted disks the
    /// add-password/reset unlock pair. A failed unlock (the tool reports
    /// exit code 1, or no usable password exists) powers the VM straight
    /// back off so it is never left waiting on a locked disk.
    pub async fn start(&mut self, vm: &Vm) -> Result<StartOutcome, FlotillaError> {
        if self.state(vm.name()).is_some_and(VmState::is_active) {
            tracing::warn!(name = vm.name(), "VM already started, skipping");
            return Ok(StartOutcome::AlreadyRunning);
        }

        tracing::info!(name = vm.name(), "starting VM");
        self.states.insert(vm.name().to_string(), VmState::Starting);

        let mut start_cmd = format!("startvm {}", vm.quoted_name());
        if vm.is_headless() {
            start_cmd.push_str(" --type headless");
        }
        // The start command's own exit code is not inspected; a failed
        // start surfaces through the runner's logs and the unlock step
        // still runs.
        self.runner.run(&start_cmd).await?;

        if !vm.is_encrypted() {
            self.states.insert(vm.name().to_string(), VmState::Running);
            return Ok(StartOutcome::Started);
        }

        self.states.insert(vm.name().to_string(), VmState::Unlocking);
        if self.unlock(vm).await? == 1 {
            self.kill(vm).await?;
            return Ok(StartOutcome::UnlockFailed);
        }

        self.states.insert(vm.name().to_string(), VmState::Running);
        Ok(StartOutcome::Unlocked)
    }

    /// Issue the add-password/reset pair for an encrypted VM.
    ///
    /// Returns the effective unlock exit code: the add-password command's
    /// code when a usable password file exists, or a synthesized 1 when it
    /// does not. The reset is issued either way once the pair begins, so
    /// the disk state is never half-applied.
    async fn unlock(&self, vm: &Vm) -> Result<i32, FlotillaError> {
        let Some(path) = vm.credential().path() else {
            tracing::error!(name = vm.name(), "no password provided for encrypted VM");
            return Ok(1);
        };

        // One read as a liveness check. The password itself never enters a
        // command line; the unlock command carries the file path.
        let usable = match tokio::fs::read_to_string(path).await {
            Ok(password) => !password.is_empty(),
            Err(error) => {
                tracing::warn!(name = vm.name(), %error, "password file unreadable");
                false
            }
        };
        if !usable {
            tracing::error!(name = vm.name(), "no password provided for encrypted VM");
            return Ok(1);
        }

        let add_cmd = format!(
            "controlvm {name} addencpassword {name} \"{path}\"",
            name = vm.quoted_name(),
            path = path.display(),
        );
        let (add_code, _) = self.runner.run(&add_cmd).await?;

        // Power-cycle to pick the password up, even when add reported a
        // failure; the caller decides what to do with the code.
        let reset_cmd = format!("controlvm {} reset", vm.quoted_name());
        self.runner.run(&reset_cmd).await?;

        Ok(add_code)
    }

    /// Power a VM off. Always issued, whatever the state map says:
    /// VBoxManage treats power-off of a stopped VM as its own error and
    /// logs accordingly, and the map is corrected to `Stopped` regardless.
    pub async fn kill(&mut self, vm: &Vm) -> Result<(), FlotillaError> {
        if self.state(vm.name()).is_none() {
            tracing::debug!(name = vm.name(), "power-off for a VM this process never started");
        }
        tracing::info!(name = vm.name(), "powering off VM");
        let cmd = format!("controlvm {} poweroff", vm.quoted_name());
        self.runner.run(&cmd).await?;
        self.states.insert(vm.name().to_string(), VmState::Stopped);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;

    use super::*;
    use crate::vm::Credential;

    /// Scripted runner: records every command line, exits 1 for commands
    /// containing the failure pattern and 0 for everything else.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedRunner {
        issued: Rc<RefCell<Vec<String>>>,
        fail_matching: Option<&'static str>,
    }

    impl ScriptedRunner {
        pub(crate) fn failing(pattern: &'static str) -> Self {
            Self {
                issued: Rc::default(),
                fail_matching: Some(pattern),
            }
        }

        pub(crate) fn issued(&self) -> Vec<String> {
            self.issued.borrow().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        async fn run(&self, command: &str) -> Result<(i32, String), FlotillaError> {
            self.issued.borrow_mut().push(command.to_string());
            let code = match self.fail_matching {
                Some(pattern) if command.contains(pattern) => 1,
                _ => 0,
            };
            Ok((code, String::new()))
        }
    }

    pub(crate) fn password_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn plain_start_issues_one_command() {
        let runner = ScriptedRunner::default();
        let mut lifecycle = Lifecycle::new(runner.clone());
        let vm = Vm::new("Alpha").unwrap();

        let outcome = lifecycle.start(&vm).await.unwrap();

        assert_eq!(outcome, StartOutcome::Started);
        assert_eq!(runner.issued(), ["startvm \"Alpha\""]);
        assert_eq!(lifecycle.state("Alpha"), Some(VmState::Running));
    }

    #[tokio::test]
    async fn headless_start_appends_type_flag() {
        let runner = ScriptedRunner::default();
        let mut lifecycle = Lifecycle::new(runner.clone());
        let vm = Vm::new("Alpha").unwrap().headless(true);

        lifecycle.start(&vm).await.unwrap();

        assert_eq!(runner.issued(), ["startvm \"Alpha\" --type headless"]);
    }

    #[tokio::test]
    async fn names_with_spaces_stay_quoted() {
        let runner = ScriptedRunner::default();
        let mut lifecycle = Lifecycle::new(runner.clone());
        let vm = Vm::new("win10 test").unwrap();

        lifecycle.start(&vm).await.unwrap();
        lifecycle.kill(&vm).await.unwrap();

        assert_eq!(
            runner.issued(),
            [
                "startvm \"win10 test\"",
                "controlvm \"win10 test\" poweroff",
            ]
        );
    }

    #[tokio::test]
    async fn encrypted_start_runs_unlock_pair() {
        let runner = ScriptedRunner::default();
        let mut lifecycle = Lifecycle::new(runner.clone());
        let file = password_file("secret123");
        let path = file.path().display().to_string();
        let vm = Vm::new("Beta")
            .unwrap()
            .encrypted(Credential::TempFile(file));

        let outcome = lifecycle.start(&vm).await.unwrap();

        assert_eq!(outcome, StartOutcome::Unlocked);
        assert_eq!(
            runner.issued(),
            [
                "startvm \"Beta\"".to_string(),
                format!("controlvm \"Beta\" addencpassword \"Beta\" \"{path}\""),
                "controlvm \"Beta\" reset".to_string(),
            ]
        );
        assert_eq!(lifecycle.state("Beta"), Some(VmState::Running));
    }

    #[tokio::test]
    async fn failed_add_password_still_resets_then_kills() {
        let runner = ScriptedRunner::failing("addencpassword");
        let mut lifecycle = Lifecycle::new(runner.clone());
        let vm = Vm::new("Beta")
            .unwrap()
            .encrypted(Credential::TempFile(password_file("wrong")));

        let outcome = lifecycle.start(&vm).await.unwrap();

        assert_eq!(outcome, StartOutcome::UnlockFailed);
        let issued = runner.issued();
        assert_eq!(issued.len(), 4);
        assert!(issued[1].contains("addencpassword"));
        assert_eq!(issued[2], "controlvm \"Beta\" reset");
        assert_eq!(issued[3], "controlvm \"Beta\" poweroff");
        assert_eq!(lifecycle.state("Beta"), Some(VmState::Stopped));
    }

    #[tokio::test]
    async fn missing_credential_kills_without_unlock_commands() {
        let runner = ScriptedRunner::default();
        let mut lifecycle = Lifecycle::new(runner.clone());
        let vm = Vm::new("Gamma").unwrap().encrypted(Credential::Missing);

        let outcome = lifecycle.start(&vm).await.unwrap();

        assert_eq!(outcome, StartOutcome::UnlockFailed);
        assert_eq!(
            runner.issued(),
            ["startvm \"Gamma\"", "controlvm \"Gamma\" poweroff"]
        );
    }

    #[tokio::test]
    async fn empty_password_file_counts_as_missing() {
        let runner = ScriptedRunner::default();
        let mut lifecycle = Lifecycle::new(runner.clone());
        let vm = Vm::new("Gamma")
            .unwrap()
            .encrypted(Credential::TempFile(password_file("")));

        let outcome = lifecycle.start(&vm).await.unwrap();

        assert_eq!(outcome, StartOutcome::UnlockFailed);
        assert_eq!(
            runner.issued(),
            ["startvm \"Gamma\"", "controlvm \"Gamma\" poweroff"]
        );
    }

    #[tokio::test]
    async fn unreadable_password_file_counts_as_missing() {
        let runner = ScriptedRunner::default();
        let mut lifecycle = Lifecycle::new(runner.clone());
        let file = password_file("secret123");
        std::fs::remove_file(file.path()).unwrap();
        let vm = Vm::new("Gamma")
            .unwrap()
            .encrypted(Credential::TempFile(file));

        let outcome = lifecycle.start(&vm).await.unwrap();

        assert_eq!(outcome, StartOutcome::UnlockFailed);
        let issued = runner.issued();
        assert_eq!(issued.last().unwrap(), "controlvm \"Gamma\" poweroff");
    }

    #[tokio::test]
    async fn double_start_is_refused_without_commands() {
        let runner = ScriptedRunner::default();
        let mut lifecycle = Lifecycle::new(runner.clone());
        let vm = Vm::new("Alpha").unwrap();

        assert_eq!(lifecycle.start(&vm).await.unwrap(), StartOutcome::Started);
        assert_eq!(
            lifecycle.start(&vm).await.unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(runner.issued().len(), 1);
    }

    #[tokio::test]
    async fn kill_is_issued_even_when_never_started() {
        let runner = ScriptedRunner::default();
        let mut lifecycle = Lifecycle::new(runner.clone());
        let vm = Vm::new("Alpha").unwrap();

        lifecycle.kill(&vm).await.unwrap();

        assert_eq!(runner.issued(), ["controlvm \"Alpha\" poweroff"]);
        assert_eq!(lifecycle.state("Alpha"), Some(VmState::Stopped));
    }

    #[tokio::test]
    async fn restart_after_kill_is_allowed() {
        let runner = ScriptedRunner::default();
        let mut lifecycle = Lifecycle::new(runner.clone());
        let vm = Vm::new("Alpha").unwrap();

        lifecycle.start(&vm).await.unwrap();
        lifecycle.kill(&vm).await.unwrap();
        let outcome = lifecycle.start(&vm).await.unwrap();

        assert_eq!(outcome, StartOutcome::Started);
        assert_eq!(runner.issued().len(), 3);
    }

    #[tokio::test]
    async fn failed_startvm_still_attempts_unlock() {
        let runner = ScriptedRunner::failing("startvm");
        let mut lifecycle = Lifecycle::new(runner.clone());
        let vm = Vm::new("Beta")
            .unwrap()
            .encrypted(Credential::TempFile(password_file("secret123")));

        let outcome = lifecycle.start(&vm).await.unwrap();

        assert_eq!(outcome, StartOutcome::Unlocked);
        let issued = runner.issued();
        assert_eq!(issued.len(), 3);
        assert!(issued[1].contains("addencpassword"));
    }
}
