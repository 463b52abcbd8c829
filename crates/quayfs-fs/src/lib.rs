#![warn(missing_docs)]

//! QuayFS filesystem semantics layer.
//!
//! Presents POSIX-style file and directory semantics over a
//! content-addressed object store. This crate owns the mount registry,
//! the path resolver, the POSIX operation set, advisory byte-range
//! locks, and the HTTP-gateway adapter that maps account, container,
//! and object semantics onto directories and files. Block allocation,
//! on-disk layout, and metadata persistence belong to the inode
//! collaborator consumed through [`volume::VolumeHandle`];
//! [`memvol::MemoryVolume`] is the in-memory backend used for
//! development and tests.

pub mod config;
pub mod flock;
pub mod gateway;
pub mod memvol;
pub mod metrics;
pub mod mount;
pub mod profiler;
pub mod types;
pub mod volume;

mod ops;
mod resolve;

pub use mount::{Mount, MountId, MountOptions, MountRegistry};
