//! Filesystem, hashing and progress helpers shared by the core modules

pub mod fs;
pub mod hash;
pub mod progress;
