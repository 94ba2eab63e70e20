//! lode - second-stage boot loader core
//!
//! This crate:
//! 1. Reads the kernel and user image placements from the image manifest
//! 2. Builds the self-map and the kernel window in static table storage
//! 3. Starts the secondary cores and holds every core at a rendezvous
//! 4. Turns translation on, per core
//! 5. Jumps to the kernel with the handoff registers
//!
//! The flow is written against [`lode_arch::Architecture`] so it runs
//! unchanged on the host under test.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod activation;
pub mod assembler;
pub mod boot;
pub mod config;
pub mod context;
pub mod cores;
pub mod handoff;
pub mod images;
pub mod logging;
pub mod platform;
pub mod rendezvous;

#[cfg(test)]
mod testing;
