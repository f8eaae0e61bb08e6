//! Command execution against the VBoxManage executable.
//!
//! Every lifecycle operation goes through [`CommandRunner`], so tests can
//! substitute a scripted runner and the controller never touches
//! `tokio::process` directly. The real implementation, [`VboxManage`],
//! hands the assembled line to the platform shell: VirtualBox command
//! grammar quotes space-containing arguments, and the shell does the
//! splitting exactly the way the manual documents it.

use std::path::{Path, PathBuf};

use crate::error::FlotillaError;

#[allow(async_fn_in_trait)] // trait is internal-only
pub trait CommandRunner {
    /// Run one management command (everything after the executable path).
    ///
    /// Returns the exit code and the merged stdout+stderr text, trimmed of
    /// surrounding whitespace. A non-zero exit is data, not an error:
    /// `Err` means the process-execution facility itself failed.
    async fn run(&self, command: &str) -> Result<(i32, String), FlotillaError>;
}

/// Runs commands through the real VBoxManage executable.
pub struct VboxManage {
    executable: PathBuf,
}

impl VboxManage {
    pub fn new(executable: PathBuf) -> Self {
        Self { executable }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl CommandRunner for VboxManage {
    async fn run(&self, command: &str) -> Result<(i32, String), FlotillaError> {
        let line = format!("\"{}\" {command}", self.executable.display());
        tracing::debug!("{line}");

        let output = shell_command(&line)
            .output()
            .await
            .map_err(|e| FlotillaError::Io {
                context: format!("invoking {}", self.executable.display()),
                source: e,
            })?;

        // Killed-by-signal has no code; -1 falls under the "not 1" policy.
        let code = output.status.code().unwrap_or(-1);

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let text = text.trim().to_string();

        // Exit code 1 is VBoxManage's error signal. Anything else that
        // produced output is informational, including other non-zero codes.
        if code == 1 {
            tracing::error!("{text}");
        } else if !text.is_empty() {
            tracing::info!("VBoxManage: {text}");
        }

        Ok((code, text))
    }
}

#[cfg(not(windows))]
fn shell_command(line: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(windows)]
fn shell_command(line: &str) -> tokio::process::Command {
    // `arg` re-escapes the line's inner quotes as `\"`, which cmd does not
    // parse. cmd /C also strips the first and the last quote character on
    // the line, so the raw line gets one extra surrounding pair.
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").raw_arg(format!("\"{line}\""));
    cmd
}

// ── executable resolution ────────────────────────────────

#[cfg(not(windows))]
const INSTALL_CANDIDATES: &[&str] = &[
    "/usr/bin/VBoxManage",
    "/usr/local/bin/VBoxManage",
    "/opt/homebrew/bin/VBoxManage",
];

#[cfg(windows)]
const INSTALL_CANDIDATES: &[&str] = &[r"C:\Program Files\Oracle\VirtualBox\VBoxManage.exe"];

#[cfg(not(windows))]
const EXECUTABLE_NAME: &str = "VBoxManage";

#[cfg(windows)]
const EXECUTABLE_NAME: &str = "VBoxManage.exe";

/// Locate the VBoxManage executable.
///
/// An explicit config path wins (and must exist); otherwise `$PATH` is
/// searched, then the usual install locations.
pub fn resolve_vboxmanage(explicit: Option<&Path>) -> Result<PathBuf, FlotillaError> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(FlotillaError::Validation {
                message: format!("configured vboxmanage path does not exist: {}", path.display()),
            });
        }
        return Ok(path.to_path_buf());
    }

    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(EXECUTABLE_NAME);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    for candidate in INSTALL_CANDIDATES {
        let path = Path::new(candidate);
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
    }

    Err(FlotillaError::VboxManageNotFound)
}


#[cfg(all(test, windows))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn quoted_executable_path_with_spaces_survives_cmd() {
        // The stock install path contains spaces, so the stub does too.
        let dir = tempfile::tempdir().unwrap();
        let spaced = dir.path().join("stub dir");
        std::fs::create_dir(&spaced).unwrap();
        let stub = spaced.join("vbox stub.cmd");
        std::fs::write(&stub, "@echo %*\r\n").unwrap();

        let runner = VboxManage::new(stub);
        let (code, output) = runner.run("startvm \"Alpha\"").await.unwrap();

        assert_eq!(code, 0);
        assert_eq!(output, "startvm \"Alpha\"");
    }
}
