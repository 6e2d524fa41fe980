//! # The A64 instruction set
//!
//! The 64-bit execution state: fixed 32-bit encodings in orthogonal decode
//! groups, a 31-register file with the SP/XZR split on register 31, and
//! exceptions routed through the EL machinery instead of banked modes.
//!
//! - [`instructions`] - decoding into [`instructions::A64Instruction`]
//! - [`operations`] - execution
//! - [`bitmask`] - the logical-immediate decoder and the BFM family

pub mod bitmask;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
pub mod instructions;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
#[allow(clippy::cast_lossless)]
#[allow(clippy::similar_names)]
pub mod operations;
