//! High-level SSA IR.
//!
//! A [`Program`] owns every value ([`Def`]) and every [`BasicBlock`] in two
//! arenas. Defs are constants, parameters, variables or instructions; all of
//! them carry a use list of `(consumer, operand-slot)` records that is kept
//! coherent by the mutation API ([`Program::set_operand`],
//! [`Program::replace_uses`], [`Program::detach_operands`]). Raw operand
//! storage is never exposed for mutation.

use std::collections::HashMap;

use crate::arena::{Arena, Handle};
use crate::types::{Type, TypeTable};

/// Handle of an SSA value.
pub type DefId = Handle<Def>;

/// Handle of a basic block.
pub type BlockId = Handle<BasicBlock>;

/// HIR operation codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpCode {
    Constant,
    Parameter,
    Variable,
    Phi,
    Ret,
    Branch,
    CondBranch,
    AccessChain,
    Load,
    Store,
    CompositeConstruct,
    CompositeExtract,
    VectorShuffle,
    OrderedLessThan,
    GcnInterpolate,
    GcnExport,
}

impl OpCode {
    /// Flags every freshly created instruction of this opcode starts with.
    pub fn default_flags(self) -> InstFlags {
        match self {
            OpCode::Store | OpCode::GcnExport => InstFlags::SIDE_EFFECTS,
            OpCode::Ret | OpCode::Branch | OpCode::CondBranch => InstFlags::CONTROL,
            _ => InstFlags::EMPTY,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OpCode::Constant => "constant",
            OpCode::Parameter => "parameter",
            OpCode::Variable => "variable",
            OpCode::Phi => "phi",
            OpCode::Ret => "ret",
            OpCode::Branch => "branch",
            OpCode::CondBranch => "cond_branch",
            OpCode::AccessChain => "access_chain",
            OpCode::Load => "load",
            OpCode::Store => "store",
            OpCode::CompositeConstruct => "composite_construct",
            OpCode::CompositeExtract => "composite_extract",
            OpCode::VectorShuffle => "vector_shuffle",
            OpCode::OrderedLessThan => "ordered_less_than",
            OpCode::GcnInterpolate => "gcn_interpolate",
            OpCode::GcnExport => "gcn_export",
        }
    }
}

/// Instruction flag set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstFlags(u16);

impl InstFlags {
    pub const EMPTY: Self = Self(0);
    /// The instruction writes memory or fixed-function state.
    pub const SIDE_EFFECTS: Self = Self(1 << 0);
    /// The instruction terminates a block.
    pub const CONTROL: Self = Self(1 << 1);
    /// The value is wave-uniform no matter what its operands are.
    pub const ALWAYS_UNIFORM: Self = Self(1 << 2);
    /// The value is per-lane no matter what its operands are.
    pub const ALWAYS_VARYING: Self = Self(1 << 3);
    /// Divergence analysis found the value to be per-lane.
    pub const VARYING: Self = Self(1 << 4);

    /// Returns `true` if `self` contains all flags in `other`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if `self` contains any flag in `other`.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for InstFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for InstFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One use of a def: which instruction consumes it, and in which operand slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UseRef {
    pub consumer: DefId,
    pub slot: usize,
}

#[derive(Clone, Debug)]
enum DefKind {
    /// Inline 64-bit payload; the raw bit pattern of the value.
    Constant { bits: u64 },
    /// Instruction with flags and an operand list.
    Inst { flags: InstFlags, operands: Vec<DefId> },
}

/// An SSA value: opcode, type, payload and use list.
#[derive(Clone, Debug)]
pub struct Def {
    op: OpCode,
    ty: Type,
    kind: DefKind,
    uses: Vec<UseRef>,
}

impl Def {
    pub fn op(&self) -> OpCode {
        self.op
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    /// Operand list; empty for constants.
    pub fn operands(&self) -> &[DefId] {
        match &self.kind {
            DefKind::Constant { .. } => &[],
            DefKind::Inst { operands, .. } => operands,
        }
    }

    pub fn operand(&self, slot: usize) -> DefId {
        self.operands()[slot]
    }

    pub fn operand_count(&self) -> usize {
        self.operands().len()
    }

    /// Instruction flags; empty for constants.
    pub fn flags(&self) -> InstFlags {
        match &self.kind {
            DefKind::Constant { .. } => InstFlags::EMPTY,
            DefKind::Inst { flags, .. } => *flags,
        }
    }

    /// Raw bit pattern of a constant.
    pub fn constant_bits(&self) -> Option<u64> {
        match &self.kind {
            DefKind::Constant { bits } => Some(*bits),
            DefKind::Inst { .. } => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, DefKind::Constant { .. })
    }

    pub fn uses(&self) -> &[UseRef] {
        &self.uses
    }

    pub fn has_uses(&self) -> bool {
        !self.uses.is_empty()
    }

    pub fn is_varying(&self) -> bool {
        self.flags().contains(InstFlags::VARYING)
    }
}

/// A basic block: an ordered instruction list plus CFG edges.
///
/// `id` is the reverse-postorder index once the ordering pass has run;
/// blocks the ordering pass could not reach keep [`BasicBlock::UNREACHABLE`].
#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
    id: u32,
    insts: Vec<DefId>,
    successors: Vec<BlockId>,
    predecessors: Vec<BlockId>,
}

impl BasicBlock {
    /// Sentinel id of a block the RPO pass did not reach.
    pub const UNREACHABLE: u32 = u32::MAX;

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn insts(&self) -> &[DefId] {
        &self.insts
    }

    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }
}

/// Shader stage of a program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgramKind {
    Fragment,
    Vertex,
    Compute,
}

/// A single-entry-point shader program in SSA form.
#[derive(Clone, Debug)]
pub struct Program {
    kind: ProgramKind,
    types: TypeTable,
    defs: Arena<Def>,
    blocks: Arena<BasicBlock>,
    order: Vec<BlockId>,
    params: Vec<DefId>,
    variables: Vec<DefId>,
    constants: HashMap<(Type, u64), DefId>,
}

impl Program {
    pub fn new(kind: ProgramKind) -> Self {
        Self {
            kind,
            types: TypeTable::new(),
            defs: Arena::new(),
            blocks: Arena::new(),
            order: Vec::new(),
            params: Vec::new(),
            variables: Vec::new(),
            constants: HashMap::new(),
        }
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut TypeTable {
        &mut self.types
    }

    /// Number of defs ever created; def handles index densely below this.
    pub fn def_count(&self) -> usize {
        self.defs.len()
    }

    pub fn def(&self, id: DefId) -> &Def {
        &self.defs[id]
    }

    /// Returns the pooled constant with the given type and bit pattern,
    /// creating it on first request.
    pub fn scalar_constant(&mut self, ty: Type, bits: u64) -> DefId {
        if let Some(&id) = self.constants.get(&(ty, bits)) {
            return id;
        }
        let id = self.defs.append(Def {
            op: OpCode::Constant,
            ty,
            kind: DefKind::Constant { bits },
            uses: Vec::new(),
        });
        self.constants.insert((ty, bits), id);
        id
    }

    /// Creates an instruction with the opcode's default flags. The operand
    /// slots are linked into their producers' use lists immediately.
    pub fn create_inst(&mut self, op: OpCode, ty: Type, operands: Vec<DefId>) -> DefId {
        self.create_inst_with_flags(op, ty, op.default_flags(), operands)
    }

    pub fn create_inst_with_flags(
        &mut self,
        op: OpCode,
        ty: Type,
        flags: InstFlags,
        operands: Vec<DefId>,
    ) -> DefId {
        let id = self.defs.append(Def {
            op,
            ty,
            kind: DefKind::Inst {
                flags,
                operands: operands.clone(),
            },
            uses: Vec::new(),
        });
        for (slot, producer) in operands.into_iter().enumerate() {
            self.defs[producer].uses.push(UseRef { consumer: id, slot });
        }
        id
    }

    /// Creates a phi whose operand slots all start as self-references
    /// ("undefined along this edge") for later [`Program::set_operand`]
    /// filling, one slot per predecessor of the join block.
    pub fn create_phi(&mut self, ty: Type, operand_count: usize) -> DefId {
        let id = self.defs.append(Def {
            op: OpCode::Phi,
            ty,
            kind: DefKind::Inst {
                flags: InstFlags::EMPTY,
                operands: Vec::new(),
            },
            uses: Vec::new(),
        });
        for slot in 0..operand_count {
            match &mut self.defs[id].kind {
                DefKind::Inst { operands, .. } => operands.push(id),
                DefKind::Constant { .. } => unreachable!(),
            }
            self.defs[id].uses.push(UseRef { consumer: id, slot });
        }
        id
    }

    /// Iterates over every def ever created, including unlinked ones.
    pub fn defs(&self) -> impl Iterator<Item = (DefId, &Def)> {
        self.defs.iter()
    }

    pub fn add_flags(&mut self, id: DefId, extra: InstFlags) {
        if let DefKind::Inst { flags, .. } = &mut self.defs[id].kind {
            *flags |= extra;
        }
    }

    /// Rewrites operand `slot` of `inst`, detaching the old producer's use
    /// record and attaching one on the new producer.
    pub fn set_operand(&mut self, inst: DefId, slot: usize, producer: DefId) {
        let old = match &mut self.defs[inst].kind {
            DefKind::Inst { operands, .. } => {
                let old = operands[slot];
                operands[slot] = producer;
                old
            }
            DefKind::Constant { .. } => unreachable!("constants have no operands"),
        };
        if old == producer {
            return;
        }
        self.detach_use(old, inst, slot);
        self.defs[producer].uses.push(UseRef {
            consumer: inst,
            slot,
        });
    }

    /// Redirects every use of `old` to `new`.
    pub fn replace_uses(&mut self, old: DefId, new: DefId) {
        let uses = std::mem::take(&mut self.defs[old].uses);
        for u in &uses {
            match &mut self.defs[u.consumer].kind {
                DefKind::Inst { operands, .. } => operands[u.slot] = new,
                DefKind::Constant { .. } => unreachable!("constants have no operands"),
            }
        }
        self.defs[new].uses.extend(uses);
    }

    /// Unlinks every operand of `inst` from its producer's use list. The
    /// operand ids stay readable but the instruction no longer counts as a
    /// consumer; this is the first half of erasing an instruction.
    pub fn detach_operands(&mut self, inst: DefId) {
        let operands: Vec<DefId> = self.def(inst).operands().to_vec();
        for (slot, producer) in operands.into_iter().enumerate() {
            self.detach_use(producer, inst, slot);
        }
    }

    /// Removes operand `slot` entirely, shifting later slots down and fixing
    /// up their use records.
    pub fn erase_operand(&mut self, inst: DefId, slot: usize) {
        let (removed, shifted) = match &mut self.defs[inst].kind {
            DefKind::Inst { operands, .. } => {
                let removed = operands.remove(slot);
                (removed, operands[slot..].to_vec())
            }
            DefKind::Constant { .. } => unreachable!("constants have no operands"),
        };
        self.detach_use(removed, inst, slot);
        for (offset, producer) in shifted.into_iter().enumerate() {
            let old_slot = slot + offset + 1;
            for u in &mut self.defs[producer].uses {
                if u.consumer == inst && u.slot == old_slot {
                    u.slot = old_slot - 1;
                    break;
                }
            }
        }
    }

    fn detach_use(&mut self, producer: DefId, consumer: DefId, slot: usize) {
        let uses = &mut self.defs[producer].uses;
        if let Some(pos) = uses
            .iter()
            .position(|u| u.consumer == consumer && u.slot == slot)
        {
            uses.swap_remove(pos);
        }
    }

    // --- blocks ---

    /// Creates a block and appends it to the program order.
    pub fn create_block(&mut self) -> BlockId {
        let id = self.blocks.append(BasicBlock {
            id: BasicBlock::UNREACHABLE,
            ..BasicBlock::default()
        });
        self.order.push(id);
        id
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    pub fn set_block_id(&mut self, block: BlockId, id: u32) {
        self.blocks[block].id = id;
    }

    /// Blocks in execution order (reverse postorder once the RPO pass ran).
    pub fn block_order(&self) -> &[BlockId] {
        &self.order
    }

    pub fn entry_block(&self) -> BlockId {
        self.order[0]
    }

    /// Reorders the block list in place by ascending block id; unreachable
    /// blocks sort last. The sort is stable.
    pub fn sort_blocks_by_id(&mut self) {
        let mut order = std::mem::take(&mut self.order);
        order.sort_by_key(|&b| self.blocks[b].id);
        self.order = order;
    }

    pub fn push_inst(&mut self, block: BlockId, inst: DefId) {
        self.blocks[block].insts.push(inst);
    }

    /// Inserts `insts` at the head of `block`, preserving their order.
    pub fn insert_insts_front(&mut self, block: BlockId, insts: Vec<DefId>) {
        let list = &mut self.blocks[block].insts;
        list.splice(0..0, insts);
    }

    /// Takes ownership of the instruction list for a rebuild-in-place pass.
    pub fn take_insts(&mut self, block: BlockId) -> Vec<DefId> {
        std::mem::take(&mut self.blocks[block].insts)
    }

    pub fn set_insts(&mut self, block: BlockId, insts: Vec<DefId>) {
        self.blocks[block].insts = insts;
    }

    /// Adds a CFG edge. Successors keep duplicates (a conditional branch may
    /// target the same block twice); predecessors are deduplicated and the
    /// predecessor index is returned.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) -> usize {
        self.blocks[from].successors.push(to);
        let preds = &mut self.blocks[to].predecessors;
        if let Some(pos) = preds.iter().position(|&p| p == from) {
            return pos;
        }
        preds.push(from);
        preds.len() - 1
    }

    // --- params and variables ---

    pub fn add_param(&mut self, def: DefId) {
        self.params.push(def);
    }

    pub fn params(&self) -> &[DefId] {
        &self.params
    }

    pub fn set_params(&mut self, params: Vec<DefId>) -> Vec<DefId> {
        std::mem::replace(&mut self.params, params)
    }

    pub fn add_variable(&mut self, def: DefId) {
        self.variables.push(def);
    }

    pub fn variables(&self) -> &[DefId] {
        &self.variables
    }

    pub fn set_variables(&mut self, variables: Vec<DefId>) -> Vec<DefId> {
        std::mem::replace(&mut self.variables, variables)
    }
}
