//! Argument lists for each external tool the pipeline drives.

pub mod builder;
pub mod common;
