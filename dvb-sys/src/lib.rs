//! Raw bindings for the Linux DVB API (version 5).
//!
//! This crate mirrors the parts of `linux/dvb/frontend.h` and
//! `linux/dvb/dmx.h` that are needed to tune a frontend and program the
//! demultiplexer. The structures are laid out exactly like their C
//! counterparts and the ioctl request functions are generated with `nix`.
//!
//! Nothing here is safe to call on its own; see the `dvbtune` crate for a
//! safe wrapper.

#![allow(non_camel_case_types, non_snake_case)]

pub mod dmx;
pub mod frontend;

pub use dmx::*;
pub use frontend::*;
