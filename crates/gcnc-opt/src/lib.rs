//! HIR pass pipeline for gcnc.
//!
//! Provides a [`Pass`] trait, the fixed-order [`Pipeline`] that prepares a
//! program for instruction selection, and the individual passes: reverse
//! postorder block ordering, composite splitting, variable promotion (SSA
//! construction), dead-code elimination, I/O lowering and divergence
//! analysis.

mod dce;
mod divergence;
mod lower_io;
mod promote;
mod rpo;
mod split;

pub use dce::EliminateDeadCode;
pub use divergence::AnalyzeDivergence;
pub use lower_io::LowerIo;
pub use promote::PromoteVariables;
pub use rpo::OrderBlocks;
pub use split::SplitComposites;

use gcnc_ir::hir::Program;

/// Errors raised by the pass pipeline. Every error is terminal for the
/// compilation; no pass attempts recovery.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    /// No block ends in a `ret` instruction.
    #[error("no return instruction found")]
    MissingRet,

    /// The terminating `ret` carries no values to export.
    #[error("return has no operands to export")]
    EmptyRet,

    /// Export groups are built 4 components at a time.
    #[error("return operand count {0} is not a multiple of 4")]
    RetOperandCount(usize),

    /// A promoted variable is loaded on a path with no prior store.
    #[error("read of variable %{0} before any write")]
    ReadBeforeWrite(usize),

    /// A `vector_shuffle` selector operand is not an integer constant.
    #[error("vector shuffle selector is not a constant")]
    InvalidShuffleIndex,

    /// A structural IR invariant does not hold.
    #[error("ir invariant violated: {0}")]
    Invariant(&'static str),
}

/// A transformation over a HIR program.
pub trait Pass {
    /// Short name used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Runs the pass, mutating the program in place.
    fn run(&self, program: &mut Program) -> Result<(), PassError>;
}

/// Runs passes in a fixed total order; a single run of each, no fixpoint.
pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl Pipeline {
    /// The order every compilation uses: RPO, split, promote, DCE, lower
    /// I/O, divergence.
    pub fn standard() -> Self {
        Self {
            passes: vec![
                Box::new(OrderBlocks),
                Box::new(SplitComposites),
                Box::new(PromoteVariables),
                Box::new(EliminateDeadCode),
                Box::new(LowerIo),
                Box::new(AnalyzeDivergence),
            ],
        }
    }

    pub fn run(&self, program: &mut Program) -> Result<(), PassError> {
        for pass in &self.passes {
            log::debug!("running pass {}", pass.name());
            pass.run(program)?;
        }
        Ok(())
    }
}
