//! An abstract-machine interpreter for C-level bytecode whose operational
//! semantics soundly and completely detect undefined behavior.
//!
//! The crate is organized leaves-first: [`types`] interns C types, [`value`]
//! implements the arithmetic rules, [`memory`] is the segmented address
//! space, [`objects`] owns object descriptors and the generational garbage
//! collector, [`trace`] detects unsequenced accesses, and [`machine`] ties
//! everything into the fetch-decode-execute loop over a
//! [`bytecode::LinkedModule`].

pub mod bytecode;
pub mod error;
pub mod host;
pub mod machine;
pub mod memory;
pub mod objects;
pub mod trace;
pub mod types;
pub mod value;

mod utilities;

pub use error::{AmError, ExitCode, Result, UbKind};
pub use machine::{AbstractMachine, MachineConfig};
pub use types::{Kind, TypeManager, TypeRef};
pub use value::Value;
