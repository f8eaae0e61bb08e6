//! VM entities: pure configuration handed to the lifecycle controller.
//!
//! A [`Vm`] is never mutated by the core: operations only read its fields
//! to assemble commands. Disk-encryption credentials are modeled as a sum
//! type so that "a persistent path pretending to be a transient secret"
//! cannot be constructed at all.

use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::FlotillaError;

/// Disk-encryption credential attached to a VM.
#[derive(Debug)]
pub enum Credential {
    /// No password available. An encrypted VM carrying this fails its
    /// unlock deterministically (and gets safety-killed).
    Missing,

    /// A short-lived file whose entire contents is the password.
    ///
    /// The handle owns the file: it is deleted when the credential drops,
    /// so disposal follows the caller's scope.
    TempFile(NamedTempFile),
}

impl Credential {
    /// Path to the password file, when one exists.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Credential::Missing => None,
            Credential::TempFile(file) => Some(file.path()),
        }
    }
}

/// One virtual machine as known to the fleet.
#[derive(Debug)]
pub struct Vm {
    name: String,
    headless: bool,
    encrypted: bool,
    credential: Credential,
}

impl Vm {
    /// Create a VM entity with the given display name.
    ///
    /// Defaults: graphical start, not encrypted, no credential.
    pub fn new(name: impl Into<String>) -> Result<Self, FlotillaError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            headless: false,
            encrypted: false,
            credential: Credential::Missing,
        })
    }

    /// Start without an attached graphical console.
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Mark the VM disk-encrypted, with the credential used to unlock it.
    ///
    /// `Credential::Missing` is valid here; the unlock then fails
    /// deterministically at start time instead of silently skipping.
    pub fn encrypted(mut self, credential: Credential) -> Self {
        self.encrypted = true;
        self.credential = credential;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_headless(&self) -> bool {
        self.headless
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// The name double-quoted for use in a shell-interpreted command line.
    /// VirtualBox names may contain spaces, so every reference is quoted.
    pub fn quoted_name(&self) -> String {
        format!("\"{}\"", self.name)
    }
}

/// VM names end up inside a shell-interpreted command line, so beyond
/// being non-empty they must not be able to break out of their quotes.
/// Spaces are fine; quotes, backslashes, `$`, backticks, and control
/// characters are not.
pub(crate) fn validate_name(name: &str) -> Result<(), FlotillaError> {
    if name.is_empty() {
        return Err(FlotillaError::Validation {
            message: "VM name must not be empty".into(),
        });
    }
    if let Some(bad) = name
        .chars()
        .find(|c| *c == '"' || *c == '\\' || *c == '$' || *c == '`' || c.is_control())
    {
        return Err(FlotillaError::Validation {
            message: format!("VM name '{name}' contains forbidden character {bad:?}"),
        });
    }
    Ok(())
}
