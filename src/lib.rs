#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod cli;
pub mod config;
pub mod error;
pub mod fleet;
pub mod init;
pub mod lifecycle;
pub mod runner;
pub mod vm;
