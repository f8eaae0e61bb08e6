use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FlotillaError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("failed to write {path}")]
    ConfigWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("VBoxManage executable not found")]
    #[diagnostic(help(
        "install VirtualBox, or point [hypervisor] vboxmanage = \"<path>\" at it in flotilla.toml"
    ))]
    VboxManageNotFound,

    #[error("no VM named '{name}' in the fleet config")]
    VmNotFound { name: String },

    #[error("prompt failed: {message}")]
    Prompt { message: String },

    #[error("password entry cancelled")]
    PromptCancelled,

    #[error("init cancelled")]
    InitCancelled,
}
