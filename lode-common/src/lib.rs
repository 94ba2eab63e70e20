//! # lode-common
//!
//! Shared types for the lode boot loader crates.
//!
//! This crate defines the data that flows between the image loader, the
//! page-table builder and the kernel handoff:
//! - [`RegionDescriptor`](image::RegionDescriptor): physical/virtual bounds of one loaded image
//! - [`CoreIdentity`](core_id::CoreIdentity): hardware and logical id of a core
//! - [`SecondaryWakeup`](core_id::SecondaryWakeup): data handed to a secondary core at start
//! - [`BootError`](error::BootError): the fatal conditions of a boot
//!
//! Types crossing into assembly stubs use `#[repr(C)]`.
//!
//! # no_std
//!
//! This crate is `#![no_std]` and has zero dependencies.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod addr;
pub mod core_id;
pub mod error;
pub mod image;

// Re-export commonly used types
pub use addr::{PhysAddr, VirtAddr};
pub use core_id::{CoreIdentity, SecondaryWakeup};
pub use error::BootError;
pub use image::{LoadedImages, RegionDescriptor};
