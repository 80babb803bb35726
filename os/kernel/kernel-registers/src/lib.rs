//! # Typed `x86_64` Registers
//!
//! Bitfield views of the two control registers a task's saved register file
//! carries: [`Cr3`] (address-space root) and [`Rflags`] (interrupt flag and
//! friends). The context switch loads them; nothing here touches the live
//! registers.

#![cfg_attr(not(any(test, doctest)), no_std)]

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(feature = "rflags")]
pub mod rflags;

#[cfg(feature = "cr3")]
pub use cr3::Cr3;

#[cfg(feature = "rflags")]
pub use rflags::Rflags;
