use std::path::PathBuf;

use inquire::validator::Validation;
use inquire::{Confirm, Text};

use crate::error::FlotillaError;
use crate::vm;

// ── wizard state ─────────────────────────────────────────

struct WizardVm {
    name: String,
    headless: bool,
    encrypted: bool,
}

// ── public entry point ───────────────────────────────────

pub fn run(defaults: bool) -> Result<(), FlotillaError> {
    let output_path = PathBuf::from("flotilla.toml");

    if output_path.exists() {
        if defaults {
            return Err(FlotillaError::Validation {
                message: "flotilla.toml already exists (use interactive mode to overwrite)".into(),
            });
        }
        let overwrite = Confirm::new("flotilla.toml already exists. Overwrite?")
            .with_default(false)
            .prompt()
            .map_err(map_inquire_err)?;
        if !overwrite {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let vms = if defaults { default_vms() } else { run_wizard()? };

    let toml = generate_toml(&vms);
    std::fs::write(&output_path, &toml).map_err(|e| FlotillaError::ConfigWrite {
        path: output_path.display().to_string(),
        source: e,
    })?;

    println!("Created flotilla.toml");
    println!("Run `flotilla up` to start the fleet.");
    Ok(())
}

// ── defaults ─────────────────────────────────────────────

fn default_vms() -> Vec<WizardVm> {
    vec![WizardVm {
        name: "dev".into(),
        headless: true,
        encrypted: false,
    }]
}

// ── interactive wizard ───────────────────────────────────

fn run_wizard() -> Result<Vec<WizardVm>, FlotillaError> {
    println!();

    let mut vms: Vec<WizardVm> = Vec::new();

    loop {
        let taken: Vec<String> = vms.iter().map(|vm| vm.name.clone()).collect();
        let name = Text::new("VM name:")
            .with_help_message("Exactly as shown by `VBoxManage list vms`")
            .with_validator(move |input: &str| {
                if vm::validate_name(input).is_err() {
                    Ok(Validation::Invalid(
                        "Name cannot be empty or contain quotes or backslashes".into(),
                    ))
                } else if taken.iter().any(|n| n == input) {
                    Ok(Validation::Invalid("Name already added".into()))
                } else {
                    Ok(Validation::Valid)
                }
            })
            .prompt()
            .map_err(map_inquire_err)?;

        let headless = Confirm::new("Start headless?")
            .with_default(false)
            .with_help_message("No GUI window; the VM runs in the background")
            .prompt()
            .map_err(map_inquire_err)?;

        let encrypted = Confirm::new("Disk encrypted?")
            .with_default(false)
            .with_help_message("You will be asked for the password on start")
            .prompt()
            .map_err(map_inquire_err)?;

        vms.push(WizardVm {
            name,
            headless,
            encrypted,
        });

        let add_more = Confirm::new("Add another VM?")
            .with_default(false)
            .prompt()
            .map_err(map_inquire_err)?;
        if !add_more {
            break;
        }
    }

    Ok(vms)
}

// ── TOML generation ──────────────────────────────────────

fn generate_toml(vms: &[WizardVm]) -> String {
    let mut out = String::new();

    out.push_str("# flotilla fleet config\n");
    out.push('\n');
    out.push_str("# [hypervisor]\n");
    out.push_str("# vboxmanage = \"/usr/bin/VBoxManage\"\n");
    out.push('\n');

    for vm in vms {
        out.push_str("[[vm]]\n");
        out.push_str(&format!("name = \"{}\"\n", vm.name));
        if vm.headless {
            out.push_str("headless = true\n");
        }
        if vm.encrypted {
            out.push_str("encrypted = true\n");
        }
        out.push('\n');
    }

    out
}

// ── error mapping ────────────────────────────────────────

fn map_inquire_err(e: inquire::InquireError) -> FlotillaError {
    match e {
        inquire::InquireError::OperationCanceled | inquire::InquireError::OperationInterrupted => {
            FlotillaError::InitCancelled
        }
        other => FlotillaError::Prompt {
            message: other.to_string(),
        },
    }
}

// ── tests ────────────────────────────────────────────────
