//! Intermediate representations for the gcnc shader compiler.
//!
//! Two IR levels share this crate. [`hir`] is the SSA form the front-end
//! produces and the optimization passes rewrite; [`lir`] is the
//! register/instruction form the backend allocates and encodes. Both are
//! arena-based: every cross-reference is a typed [`arena::Handle`] (or a
//! plain block index in LIR), so in-place mutation never invalidates
//! references.

pub mod arena;
pub mod display;
pub mod hir;
pub mod lir;
pub mod types;

pub use arena::{Arena, Handle, UniqueArena};
pub use display::{dump_hir, dump_lir};
pub use types::{StorageClass, Type, TypeInfo, TypeTable};
