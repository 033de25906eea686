//! Core functionality of the mirror
//!
//! The index engine and its building blocks, the pull-through fetcher and
//! the read-side service used by the route layer.

pub mod artifact;
pub mod batch;
pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod fetcher;
pub mod gem;
pub mod scan_state;
pub mod service;
pub mod version;
pub mod version_index;
