//! GCN backend for gcnc: HIR → LIR → machine-code words.
//!
//! Three stages, run in order by [`compile`]: instruction selection
//! ([`select`]), register allocation ([`regalloc`]) and code emission
//! ([`emit`]). Each stage's errors are fatal for the compilation.

pub mod emit;
pub mod encoder;
pub mod liveness;
pub mod regalloc;
pub mod select;

pub use emit::EmitError;
pub use regalloc::RegAllocError;
pub use select::SelectError;

use gcnc_ir::{hir, lir};

/// Errors from any backend stage.
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("instruction selection failed: {0}")]
    Select(#[from] SelectError),
    #[error("register allocation failed: {0}")]
    RegAlloc(#[from] RegAllocError),
    #[error("code emission failed: {0}")]
    Emit(#[from] EmitError),
}

/// Lowers a prepared HIR program all the way to GCN code words.
pub fn compile(program: &hir::Program) -> Result<Vec<u32>, CodegenError> {
    let mut lprog = select::select(program)?;
    regalloc::allocate(&mut lprog)?;
    let words = emit::emit(&lprog)?;
    Ok(words)
}

/// Lowers a prepared HIR program, also returning the allocated LIR for
/// inspection (`--emit-ir`).
pub fn compile_with_lir(program: &hir::Program) -> Result<(lir::Program, Vec<u32>), CodegenError> {
    let mut lprog = select::select(program)?;
    regalloc::allocate(&mut lprog)?;
    let words = emit::emit(&lprog)?;
    Ok((lprog, words))
}
