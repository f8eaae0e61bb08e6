use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "flotilla", about = "Start and stop a VirtualBox VM fleet via VBoxManage")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flotilla.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the fleet, then offer to power it back off
    Run,

    /// Start the fleet
    Up {
        /// Start only this VM
        name: Option<String>,
    },

    /// Power off the fleet
    Down {
        /// Power off only this VM
        name: Option<String>,
    },

    /// Write a starter flotilla.toml
    Init {
        /// Write a sample config without prompting
        #[arg(long)]
        defaults: bool,
    },
}
