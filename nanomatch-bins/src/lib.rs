//! Shared setup code for the nanomatch binaries

pub mod common;
