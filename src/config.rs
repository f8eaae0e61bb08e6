use std::path::Path;

use facet::Facet;

use crate::error::FlotillaError;
use crate::vm::{self, Credential, Vm};

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct HypervisorConfig {
    /// Explicit path to the VBoxManage executable. Empty means resolve
    /// from PATH and the stock install locations.
    #[facet(default)]
    pub vboxmanage: String,
}

/// One `[[vm]]` table in the fleet config.
#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct VmEntry {
    pub name: String,
    #[facet(default)]
    pub headless: bool,
    #[facet(default)]
    pub encrypted: bool,
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct FleetConfig {
    #[facet(default)]
    pub hypervisor: HypervisorConfig,
    #[facet(default)]
    pub vm: Vec<VmEntry>,
}

impl FleetConfig {
    /// Explicit VBoxManage path, when one is configured.
    pub fn vboxmanage(&self) -> Option<&Path> {
        if self.hypervisor.vboxmanage.is_empty() {
            None
        } else {
            Some(Path::new(&self.hypervisor.vboxmanage))
        }
    }

    pub fn find_vm(&self, name: &str) -> Option<&VmEntry> {
        self.vm.iter().find(|entry| entry.name == name)
    }
}

impl VmEntry {
    /// Materialize the entity, attaching the credential the caller
    /// obtained. Unencrypted VMs must be handed `Credential::Missing`.
    pub fn to_vm(&self, credential: Credential) -> Result<Vm, FlotillaError> {
        if !self.encrypted && credential.path().is_some() {
            return Err(FlotillaError::Validation {
                message: format!(
                    "VM '{}' is not marked encrypted but was given a password",
                    self.name
                ),
            });
        }

        let entity = Vm::new(&self.name)?.headless(self.headless);
        Ok(if self.encrypted {
            entity.encrypted(credential)
        } else {
            entity
        })
    }
}

// ── validation ────────────────────────────────────────────

fn validate_config(config: &FleetConfig) -> Result<(), FlotillaError> {
    if config.vm.is_empty() {
        return Err(FlotillaError::Validation {
            message: "no VMs defined (add at least one [[vm]] entry)".into(),
        });
    }

    let mut seen = std::collections::HashSet::new();
    for entry in &config.vm {
        vm::validate_name(&entry.name)?;
        if !seen.insert(entry.name.as_str()) {
            return Err(FlotillaError::Validation {
                message: format!("duplicate VM name '{}'", entry.name),
            });
        }
    }

    Ok(())
}

// ── public API ────────────────────────────────────────────

pub fn load_config(path: &Path) -> Result<FleetConfig, FlotillaError> {
    let contents = std::fs::read_to_string(path).map_err(|source| FlotillaError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;

    let config: FleetConfig =
        facet_toml::from_str(&contents).map_err(|e| FlotillaError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    validate_config(&config)?;

    Ok(config)
}
