use std::io::IsTerminal;
use std::io::Write as _;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use flotilla::cli::{Cli, Command};
use flotilla::config::{self, FleetConfig, VmEntry};
use flotilla::error::FlotillaError;
use flotilla::fleet::{Fleet, TerminalPrompt};
use flotilla::runner::{VboxManage, resolve_vboxmanage};
use flotilla::vm::{Credential, Vm};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("flotilla=debug")
    } else {
        EnvFilter::from_default_env()
            .add_directive("flotilla=info".parse().expect("valid log directive"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    // init runs before config loading, since it creates the config
    if let Command::Init { defaults } = cli.command {
        return flotilla::init::run(defaults).map_err(Into::into);
    }

    let config = config::load_config(&cli.config)?;
    let runner = VboxManage::new(resolve_vboxmanage(config.vboxmanage())?);
    tracing::debug!(path = %runner.executable().display(), "using VBoxManage");

    let mut fleet = Fleet::new(runner);

    match cli.command {
        Command::Init { .. } => unreachable!(),
        Command::Run => {
            let vms = start_targets(&config.vm)?;
            let mut prompt = TerminalPrompt;
            fleet.run_session(&vms, &mut prompt).await?;
        }
        Command::Up { name: Some(name) } => {
            let entry = find_vm(&config, &name)?;
            let vm = entry.to_vm(obtain_credential(entry)?)?;
            fleet.lifecycle().start(&vm).await?;
        }
        Command::Up { name: None } => {
            let vms = start_targets(&config.vm)?;
            fleet.start_all(&vms).await?;
        }
        Command::Down { name: Some(name) } => {
            let entry = find_vm(&config, &name)?;
            let vm = entry.to_vm(Credential::Missing)?;
            fleet.lifecycle().kill(&vm).await?;
        }
        Command::Down { name: None } => {
            let vms = kill_targets(&config.vm)?;
            fleet.kill_all(&vms).await?;
        }
    }

    Ok(())
}

fn find_vm<'a>(config: &'a FleetConfig, name: &str) -> Result<&'a VmEntry, FlotillaError> {
    config
        .find_vm(name)
        .ok_or_else(|| FlotillaError::VmNotFound {
            name: name.to_string(),
        })
}

/// Entities for power-off operations. No credentials involved.
fn kill_targets(entries: &[VmEntry]) -> Result<Vec<Vm>, FlotillaError> {
    entries
        .iter()
        .map(|entry| entry.to_vm(Credential::Missing))
        .collect()
}

/// Entities for start operations: each encrypted VM gets its disk password
/// prompted for up front, before any hypervisor command is issued.
fn start_targets(entries: &[VmEntry]) -> Result<Vec<Vm>, FlotillaError> {
    entries
        .iter()
        .map(|entry| entry.to_vm(obtain_credential(entry)?))
        .collect()
}

/// Prompt for an encrypted VM's disk password and stash it in a temp file
/// that lives as long as the entity does.
///
/// Cancelling the prompt (Esc, Ctrl+C) aborts the whole run before any
/// hypervisor command is issued. Every other path that cannot produce a
/// password resolves to `Credential::Missing` rather than an error: the
/// lifecycle controller then starts and immediately powers the VM back
/// off, which keeps fleet runs deterministic when stdin is a pipe.
fn obtain_credential(entry: &VmEntry) -> Result<Credential, FlotillaError> {
    if !entry.encrypted {
        return Ok(Credential::Missing);
    }

    if !std::io::stdin().is_terminal() {
        tracing::warn!(
            name = %entry.name,
            "stdin is not a terminal, cannot prompt for disk password"
        );
        return Ok(Credential::Missing);
    }

    let question = format!("Disk encryption password for '{}':", entry.name);
    let answer = inquire::Password::new(&question)
        .without_confirmation()
        .prompt();
    credential_from_prompt(&entry.name, answer)
}

fn credential_from_prompt(
    name: &str,
    answer: Result<String, inquire::InquireError>,
) -> Result<Credential, FlotillaError> {
    let password = match answer {
        Ok(password) => password,
        Err(
            inquire::InquireError::OperationCanceled | inquire::InquireError::OperationInterrupted,
        ) => return Err(FlotillaError::PromptCancelled),
        Err(error) => {
            tracing::warn!(%name, %error, "password prompt failed");
            return Ok(Credential::Missing);
        }
    };
    if password.is_empty() {
        return Ok(Credential::Missing);
    }

    let mut file = tempfile::NamedTempFile::new().map_err(|e| FlotillaError::Io {
        context: "creating password temp file".into(),
        source: e,
    })?;
    file.write_all(password.as_bytes())
        .map_err(|e| FlotillaError::Io {
            context: "writing password temp file".into(),
            source: e,
        })?;

    Ok(Credential::TempFile(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_password_prompt_aborts_the_run() {
        for cancel in [
            inquire::InquireError::OperationCanceled,
            inquire::InquireError::OperationInterrupted,
        ] {
            let result = credential_from_prompt("Cipher", Err(cancel));
            assert!(matches!(result, Err(FlotillaError::PromptCancelled)));
        }
    }

    #[test]
    fn failed_password_prompt_falls_back_to_missing() {
        let credential =
            credential_from_prompt("Cipher", Err(inquire::InquireError::NotTTY)).unwrap();
        assert!(matches!(credential, Credential::Missing));
    }

    #[test]
    fn empty_password_counts_as_missing() {
        let credential = credential_from_prompt("Cipher", Ok(String::new())).unwrap();
        assert!(matches!(credential, Credential::Missing));
    }

    #[test]
    fn entered_password_lands_in_a_temp_file() {
        let credential = credential_from_prompt("Cipher", Ok("hunter2".into())).unwrap();
        let contents = std::fs::read_to_string(credential.path().unwrap()).unwrap();
        assert_eq!(contents, "hunter2");
    }
}
