//! # archimedes emulation core
//!
//! A multi-generation ARM CPU core: one execution engine interpreting the
//! 26-bit ARM, 32-bit ARM, Thumb/Thumb-2/ThumbEE, Jazelle bytecode and A64
//! instruction sets across ARMv1..ARMv8, with switchable endianness
//! (LE/BE-8/BE-32), a banked register file, exception vectoring and a
//! 16-slot coprocessor gateway. No UI, no loaders, no syscall emulation -
//! those live with the host.
//!
//! ## Quick start
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use emu::config::{ArmConfig, ArmVersion, Isa, IsaSet};
//! use emu::cpu::core::ArmCore;
//! use emu::memory::SystemMemory;
//!
//! let memory = Arc::new(Mutex::new(SystemMemory::new(0, 0x1_0000)));
//! let config = ArmConfig::new(ArmVersion::V5);
//! let mut core = ArmCore::new(config, IsaSet::of(&[Isa::Arm32, Isa::Thumb]), memory)?;
//! core.set_isa(Isa::Arm32);
//! loop {
//!     if core.step() != emu::cpu::exception::StepResult::Ok {
//!         break;
//!     }
//!     # break;
//! }
//! # Ok::<(), emu::config::ConfigError>(())
//! ```
//!
//! ## Module overview
//!
//! | Module     | Description                                   |
//! |------------|-----------------------------------------------|
//! | [`config`] | Versions, features, instruction-set selection |
//! | [`cpu`]    | The core: state, decoders, exceptions         |
//! | [`memory`] | The host memory boundary and byte orderings   |

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
pub mod bitwise;

pub mod config;
pub mod cpu;
pub mod memory;
