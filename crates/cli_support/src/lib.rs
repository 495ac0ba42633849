//! Shared clap argument groups for the spatialpair binaries.

pub mod common;
