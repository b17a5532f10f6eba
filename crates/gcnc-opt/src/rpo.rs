//! Reverse-postorder block ordering.

use std::collections::HashSet;

use gcnc_ir::hir::{BasicBlock, BlockId, Program};

use crate::{Pass, PassError};

/// Assigns block ids in reverse postorder of a DFS from the entry and sorts
/// the block list by id. Blocks unreachable from the entry keep the
/// [`BasicBlock::UNREACHABLE`] sentinel and sort to the back; the pass does
/// not mutate the CFG itself.
pub struct OrderBlocks;

impl Pass for OrderBlocks {
    fn name(&self) -> &'static str {
        "rpo"
    }

    fn run(&self, program: &mut Program) -> Result<(), PassError> {
        for &block in &program.block_order().to_vec() {
            program.set_block_id(block, BasicBlock::UNREACHABLE);
        }

        let entry = program.entry_block();
        let mut postorder: Vec<BlockId> = Vec::new();
        let mut discovered: HashSet<BlockId> = HashSet::new();
        let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
        discovered.insert(entry);

        while let Some(&mut (block, ref mut cursor)) = stack.last_mut() {
            let next = program.block(block).successors().get(*cursor).copied();
            match next {
                Some(succ) => {
                    *cursor += 1;
                    if discovered.insert(succ) {
                        stack.push((succ, 0));
                    }
                }
                None => {
                    stack.pop();
                    postorder.push(block);
                }
            }
        }

        let count = postorder.len();
        for (finish, &block) in postorder.iter().enumerate() {
            program.set_block_id(block, (count - 1 - finish) as u32);
        }
        program.sort_blocks_by_id();
        Ok(())
    }
}
