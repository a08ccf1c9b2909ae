//! BASM virtual machine library.
//!
//! Loads modules in the textual BASM assembly format or the binary BASMB
//! encoding and executes their exported functions on a register machine
//! with 256 general-purpose registers, Z/N flags and a bump-allocated
//! linear memory.
//!
//! # Example
//!
//! ```ignore
//! use basm::virtual_machine::module::{Module, Value};
//!
//! let mut module = Module::from_source(r#"
//!     func $add(a, b) {
//!         add r0, r0, r1
//!         ret r0
//!     }
//!     export $add as "add"
//! "#)?;
//! assert_eq!(module.call("add", &[Value::Int(10), Value::Int(20)])?, 30);
//! ```

pub mod types;
pub mod utils;
pub mod virtual_machine;

pub use virtual_machine::errors::VmError;
pub use virtual_machine::module::{Module, Value, load};
