//! Core type definitions shared across the crate.
//!
//! Currently holds the binary encoding infrastructure the BASMB module
//! format is built on:
//! - `Encode` / `Decode`: traits for deterministic little-endian
//!   serialization, targeted by `#[derive(BinaryCodec)]`
//! - `Str16`: the `{u16 len, bytes}` string layout used by BASMB

pub mod encoding;
